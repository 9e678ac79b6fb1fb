use std::sync::{Arc, Mutex};

use log::trace;

use super::lock;
use crate::{HardwareError, SignalQuality, Tuner};

/// Noise floor reported between stations.
const FLOOR_RSSI: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimTunerMode {
    Fm,
    Am,
    Ssb { usb: bool },
}

#[derive(Debug, Clone)]
pub struct SimStation {
    /// true for an FM station (10 kHz units), false for AM (kHz).
    pub fm: bool,
    pub frequency: u16,
    pub rssi: u8,
    pub snr: u8,
    pub rds: &'static str,
}

impl SimStation {
    pub const fn fm(frequency: u16, rssi: u8, snr: u8, rds: &'static str) -> Self {
        Self {
            fm: true,
            frequency,
            rssi,
            snr,
            rds,
        }
    }

    pub const fn am(frequency: u16, rssi: u8, snr: u8) -> Self {
        Self {
            fm: false,
            frequency,
            rssi,
            snr,
            rds: "",
        }
    }
}

#[derive(Debug)]
struct TunerState {
    powered: bool,
    power_ups: usize,
    mode: SimTunerMode,
    band: (u16, u16),
    frequency: u16,
    step: u16,
    volume: u8,
    agc: (bool, u8),
    bandwidth: [u8; 3],
    seek_limits: (u16, u16),
    seek_spacing: u16,
    thresholds: (u8, u8),
    digital_rate: Option<u32>,
    stations: Vec<SimStation>,
    noise: bool,
}

#[derive(Debug, Clone)]
pub struct SimTuner {
    state: Arc<Mutex<TunerState>>,
}

impl SimTuner {
    pub fn new(stations: Vec<SimStation>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TunerState {
                powered: false,
                power_ups: 0,
                mode: SimTunerMode::Fm,
                band: (8750, 10800),
                frequency: 8750,
                step: 1,
                volume: 0,
                agc: (false, 0),
                bandwidth: [0; 3],
                seek_limits: (0, u16::MAX),
                seek_spacing: 1,
                thresholds: (0, 0),
                digital_rate: None,
                stations,
                noise: false,
            })),
        }
    }

    /// Jitter RSSI/SNR readings by a unit, like a real antenna.
    pub fn with_noise(self) -> Self {
        lock(&self.state).noise = true;
        self
    }

    pub fn default_stations() -> Vec<SimStation> {
        vec![
            SimStation::fm(8810, 32, 14, "Radio One"),
            SimStation::fm(9470, 26, 11, ""),
            SimStation::fm(10030, 41, 22, "Classic FM"),
            SimStation::fm(10490, 36, 19, "Hits 104.9"),
            SimStation::fm(10680, 11, 4, ""),
            SimStation::am(198, 27, 11),
            SimStation::am(549, 30, 15),
            SimStation::am(1008, 28, 12),
            SimStation::am(9600, 21, 10),
        ]
    }

    pub fn powered(&self) -> bool {
        lock(&self.state).powered
    }

    pub fn power_ups(&self) -> usize {
        lock(&self.state).power_ups
    }

    pub fn mode(&self) -> SimTunerMode {
        lock(&self.state).mode
    }

    pub fn current_frequency(&self) -> u16 {
        lock(&self.state).frequency
    }

    pub fn current_volume(&self) -> u8 {
        lock(&self.state).volume
    }

    pub fn agc_state(&self) -> (bool, u8) {
        lock(&self.state).agc
    }

    pub fn bandwidths(&self) -> [u8; 3] {
        lock(&self.state).bandwidth
    }

    pub fn seek_settings(&self) -> ((u16, u16), u16, (u8, u8)) {
        let s = lock(&self.state);
        (s.seek_limits, s.seek_spacing, s.thresholds)
    }

    pub fn digital_rate(&self) -> Option<u32> {
        lock(&self.state).digital_rate
    }

    fn powered_state(&self) -> Result<std::sync::MutexGuard<'_, TunerState>, HardwareError> {
        let s = lock(&self.state);
        if !s.powered {
            return Err(HardwareError::InvalidState("tuner powered down"));
        }
        Ok(s)
    }

    fn tune_band(
        &self,
        mode: SimTunerMode,
        from: u16,
        to: u16,
        initial: u16,
        step: u16,
    ) -> Result<(), HardwareError> {
        if from >= to || step == 0 {
            return Err(HardwareError::Config("invalid band"));
        }
        let mut s = self.powered_state()?;
        s.mode = mode;
        s.band = (from, to);
        s.frequency = initial.clamp(from, to);
        s.step = step;
        trace!("sim tuner: {mode:?} {from}..{to} at {}", s.frequency);
        Ok(())
    }
}

impl TunerState {
    fn station_here(&self) -> Option<&SimStation> {
        let fm = self.mode == SimTunerMode::Fm;
        self.stations
            .iter()
            .find(|st| st.fm == fm && st.frequency == self.frequency)
    }
}

impl Tuner for SimTuner {
    fn power_up(&mut self) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if s.powered {
            return Err(HardwareError::InvalidState("tuner already powered"));
        }
        s.powered = true;
        s.power_ups += 1;
        s.digital_rate = None;
        Ok(())
    }

    fn power_down(&mut self) {
        let mut s = lock(&self.state);
        s.powered = false;
        s.digital_rate = None;
    }

    fn is_powered(&self) -> bool {
        self.powered()
    }

    fn set_fm(&mut self, from: u16, to: u16, initial: u16, step: u16) -> Result<(), HardwareError> {
        self.tune_band(SimTunerMode::Fm, from, to, initial, step)
    }

    fn set_am(&mut self, from: u16, to: u16, initial: u16, step: u16) -> Result<(), HardwareError> {
        self.tune_band(SimTunerMode::Am, from, to, initial, step)
    }

    fn set_ssb(
        &mut self,
        from: u16,
        to: u16,
        initial: u16,
        step: u16,
        usb: bool,
    ) -> Result<(), HardwareError> {
        self.tune_band(SimTunerMode::Ssb { usb }, from, to, initial, step)
    }

    fn set_frequency(&mut self, frequency: u16) -> Result<(), HardwareError> {
        let mut s = self.powered_state()?;
        let (lo, hi) = s.band;
        if !(lo..=hi).contains(&frequency) {
            return Err(HardwareError::Tuner("frequency out of band"));
        }
        s.frequency = frequency;
        Ok(())
    }

    fn frequency(&mut self) -> Result<u16, HardwareError> {
        Ok(self.powered_state()?.frequency)
    }

    fn seek_up(&mut self) -> Result<Option<u16>, HardwareError> {
        let mut s = self.powered_state()?;
        let fm = s.mode == SimTunerMode::Fm;
        let (lo, hi) = s.band;
        let (seek_lo, seek_hi) = s.seek_limits;
        let (min_rssi, min_snr) = s.thresholds;

        let mut candidates: Vec<u16> = s
            .stations
            .iter()
            .filter(|st| st.fm == fm)
            .filter(|st| (lo.max(seek_lo)..=hi.min(seek_hi)).contains(&st.frequency))
            .filter(|st| st.rssi >= min_rssi && st.snr >= min_snr)
            .map(|st| st.frequency)
            .collect();
        candidates.sort_unstable();

        let current = s.frequency;
        let found = candidates
            .iter()
            .copied()
            .find(|&f| f > current)
            .or_else(|| candidates.first().copied());
        if let Some(f) = found {
            s.frequency = f;
        }
        Ok(found)
    }

    fn signal(&mut self) -> Result<SignalQuality, HardwareError> {
        let s = self.powered_state()?;
        let mut q = match s.station_here() {
            Some(st) => SignalQuality {
                rssi: st.rssi,
                snr: st.snr,
                stereo: st.fm && st.snr >= 10,
            },
            None => SignalQuality {
                rssi: FLOOR_RSSI,
                snr: 0,
                stereo: false,
            },
        };
        if s.noise {
            let jitter: i8 = rand::random_range(-1..=1);
            q.rssi = q.rssi.saturating_add_signed(jitter);
            q.snr = q.snr.saturating_add_signed(jitter);
        }
        Ok(q)
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), HardwareError> {
        if volume > 63 {
            return Err(HardwareError::Config("volume out of range"));
        }
        self.powered_state()?.volume = volume;
        Ok(())
    }

    fn set_agc(&mut self, enabled: bool, attenuation: u8) -> Result<(), HardwareError> {
        if attenuation > 36 {
            return Err(HardwareError::Config("AGC attenuation out of range"));
        }
        self.powered_state()?.agc = (enabled, attenuation);
        Ok(())
    }

    fn set_fm_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 4 {
            return Err(HardwareError::Config("FM bandwidth out of range"));
        }
        self.powered_state()?.bandwidth[0] = index;
        Ok(())
    }

    fn set_am_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 6 {
            return Err(HardwareError::Config("AM bandwidth out of range"));
        }
        self.powered_state()?.bandwidth[1] = index;
        Ok(())
    }

    fn set_ssb_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 5 {
            return Err(HardwareError::Config("SSB bandwidth out of range"));
        }
        self.powered_state()?.bandwidth[2] = index;
        Ok(())
    }

    fn set_seek_limits(&mut self, from: u16, to: u16) -> Result<(), HardwareError> {
        self.powered_state()?.seek_limits = (from, to);
        Ok(())
    }

    fn set_seek_spacing(&mut self, step: u16) -> Result<(), HardwareError> {
        self.powered_state()?.seek_spacing = step;
        Ok(())
    }

    fn set_seek_thresholds(&mut self, rssi: u8, snr: u8) -> Result<(), HardwareError> {
        self.powered_state()?.thresholds = (rssi, snr);
        Ok(())
    }

    fn configure_digital_output(&mut self, sample_rate: u32) -> Result<(), HardwareError> {
        self.powered_state()?.digital_rate = Some(sample_rate);
        Ok(())
    }

    fn rds_text(&mut self) -> Result<Option<heapless::String<64>>, HardwareError> {
        let s = self.powered_state()?;
        let Some(st) = s.station_here().filter(|st| st.fm && !st.rds.is_empty()) else {
            return Ok(None);
        };
        let mut text = heapless::String::new();
        for ch in st.rds.chars() {
            if text.push(ch).is_err() {
                break;
            }
        }
        Ok(Some(text))
    }
}
