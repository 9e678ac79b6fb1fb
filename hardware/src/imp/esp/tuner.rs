//! SI4735 receiver through the C driver component linked into the firmware.

use core::ffi::{c_char, CStr};
use std::thread;
use std::time::Duration;

use esp_idf_hal::sys::{esp_err_t, EspError};

use crate::{HardwareError, SignalQuality, Tuner};

const RESET_PIN: u8 = 12;
const FM_CURRENT_MODE: u8 = 0;
const SI473X_DIGITAL_AUDIO2: u8 = 0xB0;
const XOSCEN_RCLK: u8 = 0;

/// Room for the driver's `SI4735_t` control block, which the Rust side never
/// looks into.
#[repr(C, align(8))]
struct Control([u8; 512]);

extern "C" {
    fn i2c_master_init() -> esp_err_t;
    fn init_si4735(
        ctrl: *mut Control,
        reset_pin: u8,
        cts_int_enable: u8,
        default_function: u8,
        audio_mode: u8,
        clock_type: u8,
        gpo2_enable: u8,
    );
    fn radio_deinit(ctrl: *mut Control);
    fn powerDown();

    fn setFM(ctrl: *mut Control, from: u16, to: u16, initial: u16, step: u16);
    fn setAM(ctrl: *mut Control, from: u16, to: u16, initial: u16, step: u16);
    fn setSSB(ctrl: *mut Control, from: u16, to: u16, initial: u16, step: u16, usblsb: u8);
    fn setFrequency(ctrl: *mut Control, frequency: u16);
    fn getFrequency(ctrl: *mut Control) -> u16;
    fn seekNextStation(ctrl: *mut Control) -> u16;

    fn getCurrentReceivedSignalQuality(ctrl: *mut Control, intack: u8);
    fn getCurrentRSSI(ctrl: *mut Control) -> u8;
    fn getCurrentSNR(ctrl: *mut Control) -> u8;
    fn getCurrentPilot(ctrl: *mut Control) -> bool;

    fn setVolume(ctrl: *mut Control, volume: u8);
    fn setAutomaticGainControl(ctrl: *mut Control, agcdis: u8, agcidx: u8);
    fn setTuneFrequencyAntennaCapacitor(ctrl: *mut Control, capacitor: u16);
    fn setFmBandwidth(ctrl: *mut Control, filter: u8);
    fn setAmBandwidth(ctrl: *mut Control, amchflt: u8, amplflt: u8);
    fn setSSBAudioBandwidth(ctrl: *mut Control, audiobw: u8);
    fn setFMDeEmphasis(ctrl: *mut Control, parameter: u8);
    fn setFmBlendRssiStereoThreshold(ctrl: *mut Control, parameter: u8);
    fn setFmBLendRssiMonoThreshold(ctrl: *mut Control, parameter: u8);
    fn setFmSoftMuteMaxAttenuation(ctrl: *mut Control, smattn: i8);
    fn setFmSoftMuteSnrAttenuation(ctrl: *mut Control, smattn: u8);

    fn setSeekFmLimits(ctrl: *mut Control, bottom: u16, top: u16);
    fn setSeekAmLimits(ctrl: *mut Control, bottom: u16, top: u16);
    fn setSeekFmSpacing(ctrl: *mut Control, spacing: u16);
    fn setSeekAmSpacing(ctrl: *mut Control, spacing: u16);
    fn setSeekFmSrnThreshold(ctrl: *mut Control, value: u16);
    fn setSeekFmRssiThreshold(ctrl: *mut Control, value: u16);
    fn setSeekAmSrnThreshold(ctrl: *mut Control, value: u16);
    fn setSeekAmRssiThreshold(ctrl: *mut Control, value: u16);

    fn digitalOutputSampleRate(ctrl: *mut Control, dosr: u16);
    fn digitalOutputFormat(ctrl: *mut Control, osize: u8, omono: u8, omode: u8, ofall: u8);

    fn RdsInit();
    fn setRdsConfig(ctrl: *mut Control, rdsen: u8, bletha: u8, blethb: u8, blethc: u8, blethd: u8);
    fn setFifoCount(ctrl: *mut Control, value: u16);
    fn getRdsReceived(ctrl: *mut Control) -> bool;
    fn getRdsText2A(ctrl: *mut Control) -> *mut c_char;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Band {
    Fm,
    Am,
}

pub struct Si4735 {
    ctrl: Box<Control>,
    powered: bool,
    band: Band,
    thresholds: (u8, u8),
}

// The control block is only touched through `&mut self`.
unsafe impl Send for Si4735 {}

fn settle(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

impl Si4735 {
    pub fn new() -> Result<Self, HardwareError> {
        EspError::convert(unsafe { i2c_master_init() }).map_err(|err| {
            log::error!("tuner i2c init: {:?}", err);
            HardwareError::Tuner("i2c init")
        })?;
        Ok(Self {
            ctrl: Box::new(Control([0; 512])),
            powered: false,
            band: Band::Fm,
            thresholds: (0, 0),
        })
    }

    fn ctrl(&mut self) -> Result<*mut Control, HardwareError> {
        if !self.powered {
            return Err(HardwareError::InvalidState("tuner powered down"));
        }
        Ok(&mut *self.ctrl as *mut Control)
    }
}

impl Tuner for Si4735 {
    fn power_up(&mut self) -> Result<(), HardwareError> {
        if self.powered {
            return Err(HardwareError::InvalidState("tuner already powered"));
        }
        self.ctrl.0.fill(0);
        let ctrl = &mut *self.ctrl as *mut Control;
        unsafe {
            init_si4735(
                ctrl,
                RESET_PIN,
                0,
                FM_CURRENT_MODE,
                SI473X_DIGITAL_AUDIO2,
                XOSCEN_RCLK,
                0,
            );
        }
        settle(500);
        unsafe {
            setTuneFrequencyAntennaCapacitor(ctrl, 0);
            setFMDeEmphasis(ctrl, 1);
            setFmBlendRssiStereoThreshold(ctrl, 10);
            setFmBLendRssiMonoThreshold(ctrl, 30);
            setFmSoftMuteMaxAttenuation(ctrl, 10);
            setFmSoftMuteSnrAttenuation(ctrl, 6);
        }
        self.powered = true;
        self.band = Band::Fm;
        Ok(())
    }

    fn power_down(&mut self) {
        if !self.powered {
            return;
        }
        let ctrl = &mut *self.ctrl as *mut Control;
        unsafe {
            powerDown();
            radio_deinit(ctrl);
        }
        self.powered = false;
    }

    fn is_powered(&self) -> bool {
        self.powered
    }

    fn set_fm(&mut self, from: u16, to: u16, initial: u16, step: u16) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe { setFM(ctrl, from, to, initial, step) };
        settle(300);
        self.band = Band::Fm;
        Ok(())
    }

    fn set_am(&mut self, from: u16, to: u16, initial: u16, step: u16) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe { setAM(ctrl, from, to, initial, step) };
        self.band = Band::Am;
        Ok(())
    }

    fn set_ssb(
        &mut self,
        from: u16,
        to: u16,
        initial: u16,
        step: u16,
        usb: bool,
    ) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe { setSSB(ctrl, from, to, initial, step, if usb { 2 } else { 1 }) };
        self.band = Band::Am;
        Ok(())
    }

    fn set_frequency(&mut self, frequency: u16) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe { setFrequency(ctrl, frequency) };
        Ok(())
    }

    fn frequency(&mut self) -> Result<u16, HardwareError> {
        let ctrl = self.ctrl()?;
        Ok(unsafe { getFrequency(ctrl) })
    }

    fn seek_up(&mut self) -> Result<Option<u16>, HardwareError> {
        let ctrl = self.ctrl()?;
        let frequency = unsafe { seekNextStation(ctrl) };
        let quality = self.signal()?;
        let (rssi, snr) = self.thresholds;
        if quality.rssi < rssi || quality.snr < snr {
            return Ok(None);
        }
        Ok(Some(frequency))
    }

    fn signal(&mut self) -> Result<SignalQuality, HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe {
            getCurrentReceivedSignalQuality(ctrl, 0);
            Ok(SignalQuality {
                rssi: getCurrentRSSI(ctrl),
                snr: getCurrentSNR(ctrl),
                stereo: self.band == Band::Fm && getCurrentPilot(ctrl),
            })
        }
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), HardwareError> {
        if volume > 63 {
            return Err(HardwareError::Tuner("volume out of range"));
        }
        let ctrl = self.ctrl()?;
        unsafe { setVolume(ctrl, volume) };
        Ok(())
    }

    fn set_agc(&mut self, enabled: bool, attenuation: u8) -> Result<(), HardwareError> {
        if attenuation > 36 {
            return Err(HardwareError::Tuner("AGC attenuation out of range"));
        }
        let ctrl = self.ctrl()?;
        // AGCDIS: 0 keeps the AGC running
        unsafe { setAutomaticGainControl(ctrl, u8::from(!enabled), attenuation) };
        Ok(())
    }

    fn set_fm_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 4 {
            return Err(HardwareError::Tuner("FM bandwidth out of range"));
        }
        let ctrl = self.ctrl()?;
        unsafe { setFmBandwidth(ctrl, index) };
        Ok(())
    }

    fn set_am_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 6 {
            return Err(HardwareError::Tuner("AM bandwidth out of range"));
        }
        let ctrl = self.ctrl()?;
        unsafe { setAmBandwidth(ctrl, index, 1) };
        Ok(())
    }

    fn set_ssb_bandwidth(&mut self, index: u8) -> Result<(), HardwareError> {
        if index > 5 {
            return Err(HardwareError::Tuner("SSB bandwidth out of range"));
        }
        let ctrl = self.ctrl()?;
        unsafe { setSSBAudioBandwidth(ctrl, index) };
        Ok(())
    }

    fn set_seek_limits(&mut self, from: u16, to: u16) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        match self.band {
            Band::Fm => unsafe { setSeekFmLimits(ctrl, from, to) },
            Band::Am => unsafe { setSeekAmLimits(ctrl, from, to) },
        }
        Ok(())
    }

    fn set_seek_spacing(&mut self, step: u16) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        match self.band {
            Band::Fm => unsafe { setSeekFmSpacing(ctrl, step) },
            Band::Am => unsafe { setSeekAmSpacing(ctrl, step) },
        }
        Ok(())
    }

    fn set_seek_thresholds(&mut self, rssi: u8, snr: u8) -> Result<(), HardwareError> {
        let ctrl = self.ctrl()?;
        unsafe {
            setSeekFmRssiThreshold(ctrl, rssi.into());
            setSeekFmSrnThreshold(ctrl, snr.into());
            setSeekAmRssiThreshold(ctrl, rssi.into());
            setSeekAmSrnThreshold(ctrl, snr.into());
        }
        self.thresholds = (rssi, snr);
        Ok(())
    }

    fn configure_digital_output(&mut self, sample_rate: u32) -> Result<(), HardwareError> {
        let rate = u16::try_from(sample_rate)
            .map_err(|_| HardwareError::Tuner("sample rate out of range"))?;
        let ctrl = self.ctrl()?;
        unsafe { digitalOutputSampleRate(ctrl, rate) };
        settle(200);
        unsafe { digitalOutputFormat(ctrl, 0, 0, 0, 0) };
        settle(200);
        unsafe {
            RdsInit();
            setRdsConfig(ctrl, 3, 3, 3, 3, 3);
            setFifoCount(ctrl, 1);
        }
        Ok(())
    }

    fn rds_text(&mut self) -> Result<Option<heapless::String<64>>, HardwareError> {
        let ctrl = self.ctrl()?;
        if self.band != Band::Fm || !unsafe { getRdsReceived(ctrl) } {
            return Ok(None);
        }
        let raw = unsafe { getRdsText2A(ctrl) };
        if raw.is_null() {
            return Ok(None);
        }
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy();
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let mut out = heapless::String::new();
        for c in text.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        Ok(Some(out))
    }
}

impl Drop for Si4735 {
    fn drop(&mut self) {
        self.power_down();
    }
}
