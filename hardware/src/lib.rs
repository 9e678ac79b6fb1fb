//! Board support for the boombox.
//!
//! Every collaborator the playback core talks to is a trait here. The
//! ESP-IDF build wires them to the real peripherals, any other target gets
//! simulations that behave like the hardware closely enough for tests and
//! desktop runs.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod codec;
mod imp;
pub mod pipeline;
pub mod tuner;

pub use pipeline::{
    AudioPipeline, Element, ElementStatus, EventKind, I2sLease, I2sPort, MusicInfo,
    PipelineEvent, PipelineFactory, TrackMeta,
};
pub use tuner::{SignalQuality, Tuner};

#[cfg(not(target_os = "espidf"))]
pub use imp::sim;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("busy: {0}")]
    Busy(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("Wi-Fi error: {0}")]
    Wifi(&'static str),
    #[error("Bluetooth error: {0}")]
    Bluetooth(&'static str),
    #[error("audio error: {0}")]
    Audio(&'static str),
    #[error("tuner error: {0}")]
    Tuner(&'static str),
    #[error("storage error: {0}")]
    Storage(&'static str),
    #[error("config error: {0}")]
    Config(&'static str),
}

/// AVRCP remote control commands sent to the connected phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passthrough {
    Play,
    Pause,
    Stop,
    Forward,
    Backward,
}

/// Classic Bluetooth controller used by the A2DP sink.
pub trait Bluetooth: Send {
    /// Bring up the controller and become discoverable as `name`.
    fn enable(&mut self, name: &str) -> Result<(), HardwareError>;
    fn disable(&mut self);
    fn is_enabled(&self) -> bool;
    /// Whether a source device is currently connected.
    fn is_connected(&self) -> bool;
    fn send_passthrough(&mut self, cmd: Passthrough) -> Result<(), HardwareError>;
}

/// Station mode Wi-Fi.
pub trait WifiLink: Send {
    /// Associate and wait for an address, giving up after `timeout`.
    fn connect(&mut self, ssid: &str, password: &str, timeout: Duration)
        -> Result<(), HardwareError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

/// Key/value blob persistence, one namespace per owner.
pub trait BlobStorage: Send {
    /// Copy the blob into `buf`; `Ok(None)` when the key does not exist.
    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, HardwareError>;
    /// Write and commit.
    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), HardwareError>;
}

/// Free heap, for diagnostics around large allocations.
pub fn free_heap_bytes() -> u32 {
    imp::free_heap_bytes()
}

/// Peripherals handed out once to their owners.
pub struct Board {
    tuner: Option<Box<dyn Tuner>>,
    bluetooth: Option<Box<dyn Bluetooth>>,
    wifi: Option<Box<dyn WifiLink>>,
    storage: Option<Box<dyn BlobStorage>>,
    pipelines: Arc<dyn PipelineFactory>,
}

impl Board {
    pub fn init() -> Result<Self, HardwareError> {
        imp::init_board()
    }

    pub fn from_parts(
        tuner: Box<dyn Tuner>,
        bluetooth: Box<dyn Bluetooth>,
        wifi: Box<dyn WifiLink>,
        storage: Box<dyn BlobStorage>,
        pipelines: Arc<dyn PipelineFactory>,
    ) -> Self {
        Self {
            tuner: Some(tuner),
            bluetooth: Some(bluetooth),
            wifi: Some(wifi),
            storage: Some(storage),
            pipelines,
        }
    }

    pub fn take_tuner(&mut self) -> Result<Box<dyn Tuner>, HardwareError> {
        self.tuner
            .take()
            .ok_or(HardwareError::InvalidState("tuner already taken"))
    }

    pub fn take_bluetooth(&mut self) -> Result<Box<dyn Bluetooth>, HardwareError> {
        self.bluetooth
            .take()
            .ok_or(HardwareError::InvalidState("Bluetooth already taken"))
    }

    pub fn take_wifi(&mut self) -> Result<Box<dyn WifiLink>, HardwareError> {
        self.wifi
            .take()
            .ok_or(HardwareError::InvalidState("Wi-Fi already taken"))
    }

    pub fn take_storage(&mut self) -> Result<Box<dyn BlobStorage>, HardwareError> {
        self.storage
            .take()
            .ok_or(HardwareError::InvalidState("storage already taken"))
    }

    /// Shared by every backend; the factory arbitrates the I2S port.
    pub fn pipelines(&self) -> Arc<dyn PipelineFactory> {
        self.pipelines.clone()
    }
}
