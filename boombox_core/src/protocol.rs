use core::fmt::Write as _;

use thiserror::Error;

use crate::config::{BandType, Modulation};

/// Fixed-capacity text carried inside status snapshots.
pub type Text = heapless::String<64>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown {kind} value {value}")]
    Unknown { kind: &'static str, value: i32 },
    #[error("{tag:?} value {value} out of range")]
    OutOfRange { tag: ControlTag, value: i32 },
}

/// Playback source selected on the GUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Mode {
    #[default]
    Air = 0,
    Bt = 1,
    Web = 2,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Air, Mode::Bt, Mode::Web];

    pub fn label(self) -> &'static str {
        match self {
            Mode::Air => "Air",
            Mode::Bt => "Bluetooth",
            Mode::Web => "Web",
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Air),
            1 => Ok(Mode::Bt),
            2 => Ok(Mode::Web),
            other => Err(ProtocolError::Unknown {
                kind: "mode",
                value: other as i32,
            }),
        }
    }
}

/// Which control a GUI request refers to. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlTag {
    BandIndex = 1,
    ModulationIndex = 2,
    StepFm = 3,
    StepAm = 4,
    BandwidthFm = 5,
    BandwidthAm = 6,
    BandwidthSsb = 7,
    StepUp = 8,
    StepDown = 9,
    SeekUp = 10,
    StationStepUp = 11,
    StationStepDown = 12,
    AgcGain = 13,
    SliderAgc = 14,
    SliderVolume = 15,
    SetFrequency = 16,
    PlayControl = 17,
}

impl TryFrom<u8> for ControlTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ControlTag::*;
        Ok(match value {
            1 => BandIndex,
            2 => ModulationIndex,
            3 => StepFm,
            4 => StepAm,
            5 => BandwidthFm,
            6 => BandwidthAm,
            7 => BandwidthSsb,
            8 => StepUp,
            9 => StepDown,
            10 => SeekUp,
            11 => StationStepUp,
            12 => StationStepDown,
            13 => AgcGain,
            14 => SliderAgc,
            15 => SliderVolume,
            16 => SetFrequency,
            17 => PlayControl,
            other => {
                return Err(ProtocolError::Unknown {
                    kind: "control tag",
                    value: other as i32,
                })
            }
        })
    }
}

/// FM seek/tune spacing offered by the step selector, in 10 kHz units.
pub const FM_STEPS: [u16; 4] = [1, 5, 10, 20];
/// AM seek/tune spacing offered by the step selector, in kHz.
pub const AM_STEPS: [u16; 4] = [1, 5, 9, 10];

/// Values at or above this select a playlist station directly.
pub const SELECT_BASE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayControl {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Select(u16),
}

impl PlayControl {
    fn from_value(value: i32) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => PlayControl::Play,
            1 => PlayControl::Pause,
            2 => PlayControl::Stop,
            3 => PlayControl::Next,
            4 => PlayControl::Previous,
            v if (SELECT_BASE..=SELECT_BASE + u16::MAX as i32).contains(&v) => {
                PlayControl::Select((v - SELECT_BASE) as u16)
            }
            v => {
                return Err(ProtocolError::OutOfRange {
                    tag: ControlTag::PlayControl,
                    value: v,
                })
            }
        })
    }

    pub fn value(self) -> i32 {
        match self {
            PlayControl::Play => 0,
            PlayControl::Pause => 1,
            PlayControl::Stop => 2,
            PlayControl::Next => 3,
            PlayControl::Previous => 4,
            PlayControl::Select(index) => SELECT_BASE + index as i32,
        }
    }
}

/// A decoded control request, one variant per control semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Band(BandType),
    Modulation(Modulation),
    /// FM spacing in 10 kHz units.
    StepFm(u16),
    /// AM spacing in kHz.
    StepAm(u16),
    BandwidthFm(u8),
    BandwidthAm(u8),
    BandwidthSsb(u8),
    /// Jump to the next stored station of the current band.
    NextStation,
    PreviousStation,
    SeekUp,
    /// Retune by this many steps.
    TuneUp(u16),
    TuneDown(u16),
    Agc(bool),
    /// AGC attenuation index, 0 is maximum gain.
    AgcAttenuation(u8),
    /// Volume slider position, 0..=100.
    Volume(u8),
    SetFrequency(u16),
    Play(PlayControl),
}

/// Request sent from the GUI task to the Boombox task.
///
/// `state` is the dirty flag: a request is only meaningful when set, and the
/// sender clears it once the request has been handed to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuiRequest {
    pub state: bool,
    pub mode: Mode,
    pub tag: Option<ControlTag>,
    pub value: i32,
}

impl GuiRequest {
    /// Switch source, no control attached.
    pub fn select(mode: Mode) -> Self {
        Self {
            state: true,
            mode,
            tag: None,
            value: 0,
        }
    }

    pub fn control(mode: Mode, tag: ControlTag, value: i32) -> Self {
        Self {
            state: true,
            mode,
            tag: Some(tag),
            value,
        }
    }

    pub fn play(mode: Mode, control: PlayControl) -> Self {
        Self::control(mode, ControlTag::PlayControl, control.value())
    }

    /// Decode the tag/value pair. `Ok(None)` when no control is attached.
    pub fn command(&self) -> Result<Option<Command>, ProtocolError> {
        let Some(tag) = self.tag else {
            return Ok(None);
        };
        let value = self.value;
        let out_of_range = || ProtocolError::OutOfRange { tag, value };
        let in_range = |max: i32| -> Result<u8, ProtocolError> {
            if (0..=max).contains(&value) {
                Ok(value as u8)
            } else {
                Err(out_of_range())
            }
        };
        let steps = || -> Result<u16, ProtocolError> {
            match value {
                0 => Ok(1),
                v if (1..=u16::MAX as i32).contains(&v) => Ok(v as u16),
                _ => Err(out_of_range()),
            }
        };

        let command = match tag {
            ControlTag::BandIndex => {
                Command::Band(BandType::try_from(in_range(3)?).map_err(|_| out_of_range())?)
            }
            ControlTag::ModulationIndex => Command::Modulation(
                Modulation::try_from(in_range(4)?).map_err(|_| out_of_range())?,
            ),
            ControlTag::StepFm => Command::StepFm(FM_STEPS[in_range(3)? as usize]),
            ControlTag::StepAm => Command::StepAm(AM_STEPS[in_range(3)? as usize]),
            ControlTag::BandwidthFm => Command::BandwidthFm(in_range(4)?),
            ControlTag::BandwidthAm => Command::BandwidthAm(in_range(6)?),
            ControlTag::BandwidthSsb => Command::BandwidthSsb(in_range(5)?),
            ControlTag::StepUp => Command::NextStation,
            ControlTag::StepDown => Command::PreviousStation,
            ControlTag::SeekUp => Command::SeekUp,
            ControlTag::StationStepUp => Command::TuneUp(steps()?),
            ControlTag::StationStepDown => Command::TuneDown(steps()?),
            ControlTag::AgcGain => Command::Agc(in_range(1)? == 1),
            ControlTag::SliderAgc => Command::AgcAttenuation(in_range(36)?),
            ControlTag::SliderVolume => Command::Volume(in_range(100)?),
            ControlTag::SetFrequency => {
                if (1..=u16::MAX as i32).contains(&value) {
                    Command::SetFrequency(value as u16)
                } else {
                    return Err(out_of_range());
                }
            }
            ControlTag::PlayControl => Command::Play(PlayControl::from_value(value)?),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AirStatus {
    pub band: BandType,
    /// FM in 10 kHz units, everything else in kHz.
    pub frequency: u16,
    pub snr: u8,
    pub rssi: u8,
    /// Volume on the slider scale, 0..=100.
    pub volume: u8,
    pub stereo: bool,
    pub bandwidth: Text,
    pub step: Text,
    pub rds: Text,
    /// Position in the band's station memory, 0 when nothing is stored.
    pub station_index: u8,
}

impl AirStatus {
    pub fn band_label(&self) -> &'static str {
        self.band.label()
    }

    pub fn frequency_unit(&self) -> &'static str {
        match self.band {
            BandType::Fm => "MHz",
            _ => "kHz",
        }
    }

    pub fn stereo_label(&self) -> &'static str {
        if self.stereo {
            "STEREO"
        } else {
            "MONO"
        }
    }

    /// Fixed-width frequency as shown on the display.
    ///
    /// FM renders as `ddd.dd` and AM bands as a five digit kHz value, with
    /// leading zeros replaced by blanks: `10490` becomes `"104.90"`, `8750`
    /// becomes `" 87.50"`.
    pub fn frequency_text(&self) -> heapless::String<8> {
        let mut out = heapless::String::new();
        // Both formats fit in eight bytes.
        let _ = match self.band {
            BandType::Fm => write!(
                out,
                "{:>3}.{:02}",
                self.frequency / 100,
                self.frequency % 100
            ),
            _ => write!(out, "{:>5}", self.frequency),
        };
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub title: Text,
    pub artist: Text,
    pub album: Text,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebStatus {
    pub station: Text,
    pub uri: heapless::String<256>,
    pub station_index: u16,
    pub title: Text,
    pub playing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDetail {
    Air(AirStatus),
    Bluetooth(TrackInfo),
    Web(WebStatus),
}

/// Status sent from the Boombox task to the GUI task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: bool,
    pub mode: Mode,
    pub detail: StatusDetail,
}

impl StatusSnapshot {
    pub fn air(status: AirStatus) -> Self {
        Self {
            state: true,
            mode: Mode::Air,
            detail: StatusDetail::Air(status),
        }
    }

    pub fn bluetooth(track: TrackInfo) -> Self {
        Self {
            state: true,
            mode: Mode::Bt,
            detail: StatusDetail::Bluetooth(track),
        }
    }

    pub fn web(status: WebStatus) -> Self {
        Self {
            state: true,
            mode: Mode::Web,
            detail: StatusDetail::Web(status),
        }
    }
}
