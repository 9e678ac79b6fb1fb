//! AIR radio: the SI4735 feeding the I2S output.

use std::sync::Arc;

use boombox_core::config::{slider_to_volume, volume_to_slider, MAX_STATIONS};
use boombox_core::{
    truncated, AirRadioConfig, AirStatus, Backend, BackendError, BandType, BoomboxConfig, Command,
    Mode, Modulation, StatusSnapshot, Text,
};
use hardware::{AudioPipeline, Element, EventKind, HardwareError, MusicInfo, PipelineFactory, Tuner};
use log::{debug, info, trace, warn};

use super::{start_pipeline, teardown, POLL};

const DIGITAL_RATE: u32 = 48_000;
const CHAIN: [(Element, &str); 2] = [(Element::I2sReader, "i2s_reader"), (Element::I2sWriter, "i2s")];
const TAGS: [&str; 2] = ["i2s_reader", "i2s"];

const FM_BANDWIDTHS: [&str; 5] = ["AUT", "110", "84", "60", "40"];
const AM_BANDWIDTHS: [&str; 7] = ["6.0", "4.0", "3.0", "2.0", "1.0", "1.8", "2.5"];
const SSB_BANDWIDTHS: [&str; 6] = ["1.2", "2.2", "3.0", "4.0", "0.5", "1.0"];

fn peripheral_err(err: HardwareError) -> BackendError {
    BackendError::Peripheral(err.to_string())
}

pub struct AirPlayer {
    tuner: Box<dyn Tuner>,
    pipelines: Arc<dyn PipelineFactory>,
    pipeline: Option<Box<dyn AudioPipeline>>,
    last: Option<AirStatus>,
}

impl AirPlayer {
    pub fn new(tuner: Box<dyn Tuner>, pipelines: Arc<dyn PipelineFactory>) -> Self {
        Self {
            tuner,
            pipelines,
            pipeline: None,
            last: None,
        }
    }

    /// Program the band, modulation and frequency held in `air`.
    fn tune_band(&mut self, air: &AirRadioConfig) -> Result<(), HardwareError> {
        let (lo, hi) = air.band.limits();
        let frequency = air.band.clamp(air.frequency);
        match (air.band, air.modulation) {
            (BandType::Fm, _) => self.tuner.set_fm(lo, hi, frequency, air.step_fm)?,
            (_, m) if m.is_ssb() => {
                self.tuner
                    .set_ssb(lo, hi, frequency, air.step_am, m == Modulation::Usb)?;
                self.tuner.set_ssb_bandwidth(air.bandwidth_ssb)?;
            }
            _ => self.tuner.set_am(lo, hi, frequency, air.step_am)?,
        }
        self.tuner.set_seek_limits(lo, hi)?;
        self.tuner.set_seek_spacing(air.step())
    }

    fn bring_up(&mut self, air: &AirRadioConfig) -> Result<(), HardwareError> {
        self.tuner.power_up()?;
        self.tuner.set_fm_bandwidth(air.bandwidth_fm)?;
        self.tuner.set_am_bandwidth(air.bandwidth_am)?;
        self.tuner
            .set_seek_thresholds(air.rssi_threshold, air.snr_threshold)?;
        self.tune_band(air)?;
        self.tuner.set_volume(air.volume)?;
        self.tuner.configure_digital_output(DIGITAL_RATE)?;
        self.tuner.set_agc(air.agc_enabled, air.agc_attenuation)
    }

    /// Seek through the whole band once and store what passes the
    /// thresholds. Stops when the seek wraps to a station already found.
    fn scan(&mut self, air: &mut AirRadioConfig) -> Result<usize, HardwareError> {
        let (lo, _) = air.band.limits();
        self.tuner.set_frequency(lo)?;

        let mut found: heapless::Vec<u16, MAX_STATIONS> = heapless::Vec::new();
        while let Some(frequency) = self.tuner.seek_up()? {
            if found.contains(&frequency) || found.push(frequency).is_err() {
                break;
            }
        }
        let stored = air.memory_mut(air.band).store_scan(&found);
        info!("air: scan of {} found {stored} stations", air.band.label());
        Ok(stored)
    }

    fn retune(&mut self, air: &mut AirRadioConfig, frequency: u16) -> Result<(), HardwareError> {
        self.tuner.set_frequency(frequency)?;
        air.frequency = frequency;
        Ok(())
    }

    fn step_station(&mut self, air: &mut AirRadioConfig, forward: bool) -> Result<(), HardwareError> {
        let band = air.band;
        if air.memory(band).is_empty() {
            if self.scan(air)? == 0 {
                // scanning moved the tuner, go back
                let previous = air.frequency;
                return self.retune(air, previous);
            }
            let first = air.memory(band).current_frequency();
            return match first {
                Some(f) => self.retune(air, f),
                None => Ok(()),
            };
        }
        let memory = air.memory_mut(band);
        let next = if forward {
            memory.next()
        } else {
            memory.previous()
        };
        match next {
            Some(f) => self.retune(air, f),
            None => Ok(()),
        }
    }

    fn apply(&mut self, command: Command, air: &mut AirRadioConfig) -> Result<(), HardwareError> {
        match command {
            Command::Band(band) => {
                air.band = band;
                air.modulation = band.default_modulation();
                air.frequency = air
                    .memory(band)
                    .current_frequency()
                    .unwrap_or_else(|| band.default_frequency());
                self.tune_band(air)?;
            }
            Command::Modulation(modulation) => {
                if (air.band == BandType::Fm) != (modulation == Modulation::Fm) {
                    warn!(
                        "air: {} not available on {}",
                        modulation.label(),
                        air.band.label()
                    );
                    return Ok(());
                }
                air.modulation = modulation;
                self.tune_band(air)?;
            }
            Command::StepFm(step) => {
                air.step_fm = step;
                if air.band == BandType::Fm {
                    self.tuner.set_seek_spacing(step)?;
                }
            }
            Command::StepAm(step) => {
                air.step_am = step;
                if air.band != BandType::Fm {
                    self.tuner.set_seek_spacing(step)?;
                }
            }
            Command::BandwidthFm(index) => {
                self.tuner.set_fm_bandwidth(index)?;
                air.bandwidth_fm = index;
            }
            Command::BandwidthAm(index) => {
                self.tuner.set_am_bandwidth(index)?;
                air.bandwidth_am = index;
            }
            Command::BandwidthSsb(index) => {
                self.tuner.set_ssb_bandwidth(index)?;
                air.bandwidth_ssb = index;
            }
            Command::NextStation => self.step_station(air, true)?,
            Command::PreviousStation => self.step_station(air, false)?,
            Command::SeekUp => match self.tuner.seek_up()? {
                Some(frequency) => {
                    air.frequency = frequency;
                    air.memory_mut(air.band).select(frequency);
                }
                None => info!("air: seek found no station"),
            },
            Command::TuneUp(steps) => {
                let target = air
                    .frequency
                    .saturating_add(steps.saturating_mul(air.step()));
                let target = air.band.clamp(target);
                self.retune(air, target)?;
            }
            Command::TuneDown(steps) => {
                let target = air
                    .frequency
                    .saturating_sub(steps.saturating_mul(air.step()));
                let target = air.band.clamp(target);
                self.retune(air, target)?;
            }
            Command::Agc(enabled) => {
                self.tuner.set_agc(enabled, air.agc_attenuation)?;
                air.agc_enabled = enabled;
            }
            Command::AgcAttenuation(attenuation) => {
                self.tuner.set_agc(air.agc_enabled, attenuation)?;
                air.agc_attenuation = attenuation;
            }
            Command::Volume(slider) => {
                let volume = slider_to_volume(slider);
                self.tuner.set_volume(volume)?;
                air.volume = volume;
            }
            Command::SetFrequency(frequency) => {
                if !air.band.contains(frequency) {
                    warn!("air: {frequency} outside {}", air.band.label());
                    return Ok(());
                }
                self.retune(air, frequency)?;
                air.memory_mut(air.band).select(frequency);
            }
            Command::Play(control) => debug!("air: {control:?} has no meaning here"),
        }
        Ok(())
    }

    fn status(&mut self, air: &AirRadioConfig) -> Result<AirStatus, HardwareError> {
        let frequency = self.tuner.frequency()?;
        let signal = self.tuner.signal()?;
        let rds = self.tuner.rds_text()?;
        let memory = air.memory(air.band);

        Ok(AirStatus {
            band: air.band,
            frequency,
            snr: signal.snr,
            rssi: signal.rssi,
            volume: volume_to_slider(air.volume),
            stereo: signal.stereo,
            bandwidth: bandwidth_text(air),
            step: step_text(air),
            rds: rds.map(|t| truncated(&t)).unwrap_or_default(),
            station_index: if memory.is_empty() {
                0
            } else {
                memory.current + 1
            },
        })
    }
}

fn bandwidth_text(air: &AirRadioConfig) -> Text {
    let label = match (air.band, air.modulation) {
        (BandType::Fm, _) => FM_BANDWIDTHS.get(air.bandwidth_fm as usize),
        (_, m) if m.is_ssb() => SSB_BANDWIDTHS.get(air.bandwidth_ssb as usize),
        _ => AM_BANDWIDTHS.get(air.bandwidth_am as usize),
    };
    match label {
        Some(&"AUT") => truncated("AUT"),
        Some(l) => truncated(&format!("{l}kHz")),
        None => Text::new(),
    }
}

fn step_text(air: &AirRadioConfig) -> Text {
    let khz = match air.band {
        BandType::Fm => u32::from(air.step_fm) * 10,
        _ => u32::from(air.step_am),
    };
    truncated(&format!("{khz}kHz"))
}

impl Backend for AirPlayer {
    fn mode(&self) -> Mode {
        Mode::Air
    }

    fn init(&mut self, config: &BoomboxConfig) -> Result<(), BackendError> {
        if self.is_initialized() {
            self.deinit();
        }
        let air = &config.air;
        info!(
            "air: init {} {} at {}",
            air.band.label(),
            air.modulation.label(),
            air.frequency
        );

        if let Err(err) = self.bring_up(air) {
            self.tuner.power_down();
            return Err(peripheral_err(err));
        }

        let clock = MusicInfo {
            sample_rate: DIGITAL_RATE,
            bits: 16,
            channels: 2,
        };
        match start_pipeline("air", self.pipelines.as_ref(), &CHAIN, |p| {
            p.set_i2s_clock(clock)
        }) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => {
                self.tuner.power_down();
                return Err(err);
            }
        }
        self.last = None;
        Ok(())
    }

    fn run(&mut self, command: Option<Command>, config: &mut BoomboxConfig) -> Option<StatusSnapshot> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            warn!("air: run while not initialised");
            return None;
        };

        match pipeline.listen(POLL) {
            Ok(Some(event)) => match event.kind {
                EventKind::Status(status) => info!("air: {} reports {status:?}", event.source),
                other => trace!("air: {} event {other:?}", event.source),
            },
            Ok(None) => {}
            Err(err) => debug!("air: listen: {err}"),
        }

        if let Some(cmd) = command {
            debug!("air: {cmd:?}");
            if let Err(err) = self.apply(cmd, &mut config.air) {
                warn!("air: {cmd:?} failed: {err}");
            }
        }

        let status = match self.status(&config.air) {
            Ok(status) => status,
            Err(err) => {
                warn!("air: status: {err}");
                return None;
            }
        };
        if command.is_none() && self.last.as_ref() == Some(&status) {
            return None;
        }
        self.last = Some(status.clone());
        Some(StatusSnapshot::air(status))
    }

    fn deinit(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            warn!("air: deinit while not initialised");
            return;
        };
        teardown("air", pipeline, &TAGS);
        self.tuner.power_down();
        self.last = None;
        info!("air: released");
    }

    fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use boombox_core::{ControlTag, GuiRequest, StatusDetail};
    use hardware::sim::{SimPipelineFactory, SimTuner, SimTunerMode};
    use hardware::PipelineEvent;

    use super::*;

    struct Rig {
        tuner: SimTuner,
        pipelines: SimPipelineFactory,
        player: AirPlayer,
        config: BoomboxConfig,
    }

    fn rig() -> Rig {
        let tuner = SimTuner::new(SimTuner::default_stations());
        let pipelines = SimPipelineFactory::new();
        let player = AirPlayer::new(Box::new(tuner.clone()), Arc::new(pipelines.clone()));
        Rig {
            tuner,
            pipelines,
            player,
            config: BoomboxConfig::default(),
        }
    }

    fn send(rig: &mut Rig, tag: ControlTag, value: i32) -> AirStatus {
        let command = GuiRequest::control(Mode::Air, tag, value)
            .command()
            .unwrap();
        match rig.player.run(command, &mut rig.config) {
            Some(StatusSnapshot {
                detail: StatusDetail::Air(status),
                ..
            }) => status,
            other => panic!("expected AIR status, got {other:?}"),
        }
    }

    #[test]
    fn init_programs_tuner_from_config() {
        let mut rig = rig();
        rig.config.air.frequency = 10490;
        rig.config.air.volume = 40;
        rig.player.init(&rig.config).unwrap();

        assert!(rig.tuner.powered());
        assert_eq!(rig.tuner.mode(), SimTunerMode::Fm);
        assert_eq!(rig.tuner.current_frequency(), 10490);
        assert_eq!(rig.tuner.current_volume(), 40);
        assert_eq!(rig.tuner.digital_rate(), Some(DIGITAL_RATE));
        assert!(rig.pipelines.i2s_claimed());
        assert_eq!(rig.pipelines.i2s_clock().map(|c| c.sample_rate), Some(DIGITAL_RATE));
    }

    #[test]
    fn first_run_reports_status_then_only_changes() {
        let mut rig = rig();
        rig.config.air.frequency = 10490;
        rig.player.init(&rig.config).unwrap();

        let Some(StatusSnapshot {
            detail: StatusDetail::Air(status),
            ..
        }) = rig.player.run(None, &mut rig.config)
        else {
            panic!("no first status");
        };
        assert_eq!(status.frequency_text().as_str(), "104.90");
        assert_eq!(status.rds.as_str(), "Hits 104.9");
        assert!(status.stereo);
        assert_eq!(status.bandwidth.as_str(), "AUT");
        assert_eq!(status.step.as_str(), "10kHz");

        assert_eq!(rig.player.run(None, &mut rig.config), None);
    }

    #[test]
    fn volume_slider_is_scaled_to_tuner_range() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();

        let status = send(&mut rig, ControlTag::SliderVolume, 100);
        assert_eq!(rig.tuner.current_volume(), 63);
        assert_eq!(rig.config.air.volume, 63);
        assert_eq!(status.volume, 100);
    }

    #[test]
    fn station_step_scans_empty_memory() {
        let mut rig = rig();
        rig.config.air.rssi_threshold = 15;
        rig.config.air.snr_threshold = 8;
        rig.player.init(&rig.config).unwrap();

        let status = send(&mut rig, ControlTag::StepUp, 0);
        let memory = rig.config.air.memory(BandType::Fm);
        assert_eq!(&memory.stations[..memory.count()], &[8810, 9470, 10030, 10490]);
        assert_eq!(status.frequency, 8810);
        assert_eq!(status.station_index, 1);

        let status = send(&mut rig, ControlTag::StepUp, 0);
        assert_eq!(status.frequency, 9470);
        let status = send(&mut rig, ControlTag::StepDown, 0);
        assert_eq!(status.frequency, 8810);
        assert_eq!(rig.config.air.frequency, 8810);
    }

    #[test]
    fn band_change_switches_tuner_mode() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();

        let status = send(&mut rig, ControlTag::BandIndex, BandType::Mw as i32);
        assert_eq!(rig.tuner.mode(), SimTunerMode::Am);
        assert_eq!(rig.config.air.band, BandType::Mw);
        assert_eq!(rig.config.air.modulation, Modulation::Am);
        assert_eq!(status.frequency, BandType::Mw.default_frequency());
        assert_eq!(status.frequency_unit(), "kHz");
        assert!(!status.stereo);

        // FM modulation stays unavailable on MW
        send(&mut rig, ControlTag::ModulationIndex, Modulation::Fm as i32);
        assert_eq!(rig.config.air.modulation, Modulation::Am);

        send(&mut rig, ControlTag::ModulationIndex, Modulation::Usb as i32);
        assert_eq!(rig.tuner.mode(), SimTunerMode::Ssb { usb: true });
    }

    #[test]
    fn tuning_clamps_to_band_edges() {
        let mut rig = rig();
        rig.config.air.frequency = 10790;
        rig.player.init(&rig.config).unwrap();

        let status = send(&mut rig, ControlTag::StationStepUp, 50);
        assert_eq!(status.frequency, 10800);
        let status = send(&mut rig, ControlTag::StationStepDown, 0);
        assert_eq!(status.frequency, 10799);

        // outside the band: ignored
        send(&mut rig, ControlTag::SetFrequency, 1008);
        assert_eq!(rig.tuner.current_frequency(), 10799);
    }

    #[test]
    fn agc_controls_reach_tuner() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();

        send(&mut rig, ControlTag::AgcGain, 1);
        send(&mut rig, ControlTag::SliderAgc, 12);
        assert_eq!(rig.tuner.agc_state(), (true, 12));
        assert!(rig.config.air.agc_enabled);
        assert_eq!(rig.config.air.agc_attenuation, 12);
    }

    #[test]
    fn deinit_releases_everything_and_is_idempotent() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.pipelines.inject(PipelineEvent {
            source: "i2s",
            kind: EventKind::Status(hardware::ElementStatus::Running),
        });
        rig.player.run(None, &mut rig.config);

        rig.player.deinit();
        assert!(!rig.tuner.powered());
        assert!(!rig.pipelines.i2s_claimed());
        assert_eq!(rig.pipelines.live_pipelines(), 0);

        rig.player.deinit();
        assert_eq!(rig.player.run(None, &mut rig.config), None);
    }

    #[test]
    fn reinit_starts_over() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.player.init(&rig.config).unwrap();
        assert_eq!(rig.tuner.power_ups(), 2);
        assert_eq!(rig.pipelines.live_pipelines(), 1);
    }

    #[test]
    fn failed_pipeline_powers_tuner_down() {
        let mut rig = rig();
        let mut other = hardware::PipelineFactory::create(&rig.pipelines).unwrap();
        other.register(Element::I2sWriter, "i2s").unwrap();

        let err = rig.player.init(&rig.config).unwrap_err();
        assert!(matches!(err, BackendError::Pipeline(_)));
        assert!(!rig.tuner.powered());
        assert!(!rig.player.is_initialized());
        other.deinit().unwrap();
    }

    #[test]
    fn bandwidth_and_step_labels() {
        let fm = AirRadioConfig {
            band: BandType::Fm,
            modulation: Modulation::Fm,
            step_fm: 10,
            bandwidth_fm: 0,
            ..AirRadioConfig::default()
        };
        assert_eq!(bandwidth_text(&fm).as_str(), "AUT");
        assert_eq!(step_text(&fm).as_str(), "100kHz");

        let usb = AirRadioConfig {
            band: BandType::Sw,
            modulation: Modulation::Usb,
            step_am: 1,
            bandwidth_ssb: 1,
            ..AirRadioConfig::default()
        };
        assert_eq!(bandwidth_text(&usb).as_str(), "2.2kHz");
        assert_eq!(step_text(&usb).as_str(), "1kHz");

        let out_of_range = AirRadioConfig {
            band: BandType::Mw,
            modulation: Modulation::Am,
            bandwidth_am: 40,
            ..AirRadioConfig::default()
        };
        assert!(bandwidth_text(&out_of_range).is_empty());
    }
}
