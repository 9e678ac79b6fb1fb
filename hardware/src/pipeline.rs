//! Linear audio pipelines: source element, optional decoder, I2S sink.
//!
//! The lifecycle mirrors the usual element framework contract:
//! register -> link -> set_listener -> run, then
//! stop -> wait_for_stop -> terminate -> remove_listener -> unregister -> deinit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    I2sWriter,
    /// Reads the tuner's digital audio output.
    I2sReader,
    HttpReader,
    A2dpReader,
    Mp3Decoder,
}

impl Element {
    pub fn uses_i2s(self) -> bool {
        matches!(self, Element::I2sWriter | Element::I2sReader)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicInfo {
    pub sample_rate: u32,
    pub bits: u8,
    pub channels: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    Running,
    Paused,
    Stopped,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackMeta {
    pub title: heapless::String<64>,
    pub artist: heapless::String<64>,
    pub album: heapless::String<64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    MusicInfo(MusicInfo),
    Status(ElementStatus),
    Track(TrackMeta),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    /// Tag of the element that raised the event.
    pub source: &'static str,
    pub kind: EventKind,
}

pub trait AudioPipeline: Send {
    fn register(&mut self, element: Element, tag: &'static str) -> Result<(), HardwareError>;
    fn link(&mut self, tags: &[&'static str]) -> Result<(), HardwareError>;
    fn set_listener(&mut self) -> Result<(), HardwareError>;
    fn run(&mut self) -> Result<(), HardwareError>;
    fn pause(&mut self) -> Result<(), HardwareError>;
    fn resume(&mut self) -> Result<(), HardwareError>;
    fn stop(&mut self) -> Result<(), HardwareError>;
    fn wait_for_stop(&mut self) -> Result<(), HardwareError>;
    fn terminate(&mut self) -> Result<(), HardwareError>;
    /// Clear buffers and element state so a terminated pipeline can run again.
    fn reset(&mut self) -> Result<(), HardwareError>;
    fn set_uri(&mut self, tag: &'static str, uri: &str) -> Result<(), HardwareError>;
    fn set_i2s_clock(&mut self, info: MusicInfo) -> Result<(), HardwareError>;
    /// Next event, waiting at most `timeout`.
    fn listen(&mut self, timeout: Duration) -> Result<Option<PipelineEvent>, HardwareError>;
    fn remove_listener(&mut self) -> Result<(), HardwareError>;
    fn unregister(&mut self, tag: &'static str) -> Result<(), HardwareError>;
    /// Release the pipeline. Nothing may be called afterwards.
    fn deinit(&mut self) -> Result<(), HardwareError>;
}

pub trait PipelineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioPipeline>, HardwareError>;
}

/// The single I2S port. Elements that touch it must hold its lease.
#[derive(Debug, Clone, Default)]
pub struct I2sPort {
    claimed: Arc<AtomicBool>,
}

impl I2sPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> Result<I2sLease, HardwareError> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HardwareError::Busy("i2s"))?;
        Ok(I2sLease {
            claimed: self.claimed.clone(),
        })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct I2sLease {
    claimed: Arc<AtomicBool>,
}

impl Drop for I2sLease {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}
