//! Source selection and GUI exchange logic for the boombox firmware.
//!
//! Everything in here is hardware independent: the GUI/Boombox message
//! types, the bounded mailboxes between the two tasks, the persisted
//! configuration, the web radio playlist and the arbiter that decides which
//! playback backend owns the audio output.

pub mod arbiter;
pub mod backend;
pub mod config;
pub mod playlist;
pub mod protocol;
pub mod queue;

pub use arbiter::{ArbiterError, PlayerArbiter, StepReport, Transition};
pub use backend::{Backend, BackendError, PlayerState};
pub use config::{
    AirRadioConfig, BandType, BoomboxConfig, ConfigError, ConfigStore, MemoryStore, Modulation,
    StationMemory, StoreError, CONFIG_KEY, NVS_NAMESPACE,
};
pub use playlist::{Playlist, PlaylistEntry, PlaylistError};
pub use protocol::{
    AirStatus, Command, ControlTag, GuiRequest, Mode, PlayControl, ProtocolError, StatusDetail,
    StatusSnapshot, Text, TrackInfo, WebStatus,
};
pub use queue::{mailbox, Inbox, Outbox, PostError};

/// Copy `src` into a fixed-capacity string, cutting at a char boundary when
/// it does not fit.
pub fn truncated<const N: usize>(src: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in src.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        let s: heapless::String<4> = truncated("abcdef");
        assert_eq!(s.as_str(), "abcd");

        // 'é' is two bytes, only one fits after "abc"
        let s: heapless::String<4> = truncated("abcé");
        assert_eq!(s.as_str(), "abc");
    }
}
