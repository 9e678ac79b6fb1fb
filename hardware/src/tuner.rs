use crate::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalQuality {
    /// dBuV
    pub rssi: u8,
    /// dB
    pub snr: u8,
    /// FM pilot present
    pub stereo: bool,
}

/// SI4735 style AM/FM/SW receiver.
///
/// Frequencies are in 10 kHz units on FM and kHz everywhere else. Every
/// call except `power_up` fails with `InvalidState` while powered down.
pub trait Tuner: Send {
    fn power_up(&mut self) -> Result<(), HardwareError>;
    fn power_down(&mut self);
    fn is_powered(&self) -> bool;

    fn set_fm(&mut self, from: u16, to: u16, initial: u16, step: u16)
        -> Result<(), HardwareError>;
    fn set_am(&mut self, from: u16, to: u16, initial: u16, step: u16)
        -> Result<(), HardwareError>;
    fn set_ssb(
        &mut self,
        from: u16,
        to: u16,
        initial: u16,
        step: u16,
        usb: bool,
    ) -> Result<(), HardwareError>;

    fn set_frequency(&mut self, frequency: u16) -> Result<(), HardwareError>;
    fn frequency(&mut self) -> Result<u16, HardwareError>;
    /// Seek to the next station above the current frequency, wrapping at the
    /// top of the band. `None` when no station passes the seek thresholds.
    fn seek_up(&mut self) -> Result<Option<u16>, HardwareError>;
    fn signal(&mut self) -> Result<SignalQuality, HardwareError>;

    /// 0..=63
    fn set_volume(&mut self, volume: u8) -> Result<(), HardwareError>;
    /// `attenuation` 0..=36, ignored while AGC is enabled.
    fn set_agc(&mut self, enabled: bool, attenuation: u8) -> Result<(), HardwareError>;
    fn set_fm_bandwidth(&mut self, index: u8) -> Result<(), HardwareError>;
    fn set_am_bandwidth(&mut self, index: u8) -> Result<(), HardwareError>;
    fn set_ssb_bandwidth(&mut self, index: u8) -> Result<(), HardwareError>;

    fn set_seek_limits(&mut self, from: u16, to: u16) -> Result<(), HardwareError>;
    fn set_seek_spacing(&mut self, step: u16) -> Result<(), HardwareError>;
    fn set_seek_thresholds(&mut self, rssi: u8, snr: u8) -> Result<(), HardwareError>;

    /// Route audio to the I2S digital output at `sample_rate`.
    fn configure_digital_output(&mut self, sample_rate: u32) -> Result<(), HardwareError>;
    /// Latest RDS radio text, if any has been decoded.
    fn rds_text(&mut self) -> Result<Option<heapless::String<64>>, HardwareError>;
}
