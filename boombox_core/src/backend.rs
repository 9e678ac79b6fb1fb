use thiserror::Error;

use crate::config::BoomboxConfig;
use crate::protocol::{Command, Mode, StatusSnapshot};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("peripheral bring-up failed: {0}")]
    Peripheral(String),
    #[error("audio pipeline failed: {0}")]
    Pipeline(String),
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("backend misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Inactive,
    Active,
}

/// One playback source and the hardware it owns while active.
///
/// Lifecycle is `init` -> any number of `run` -> `deinit`. The arbiter never
/// calls `init` on a second backend before the active one is deinitialised,
/// so an implementation may assume it has exclusive use of the audio output
/// between `init` and `deinit`.
pub trait Backend: Send {
    fn mode(&self) -> Mode;

    /// Acquire peripherals and start the pipeline. Must deinitialise first
    /// when called on an initialised backend.
    fn init(&mut self, config: &BoomboxConfig) -> Result<(), BackendError>;

    /// One non-blocking iteration: apply `command` if any, handle at most one
    /// pipeline event and report status when there is something new to show.
    /// Errors are logged, never surfaced; `run` does not change the lifecycle.
    fn run(&mut self, command: Option<Command>, config: &mut BoomboxConfig)
        -> Option<StatusSnapshot>;

    /// Stop and release everything `init` acquired. A no-op with a warning
    /// when there is nothing to release.
    fn deinit(&mut self);

    fn is_initialized(&self) -> bool;
}
