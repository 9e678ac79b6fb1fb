use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{trace, warn};

use super::lock;
use crate::{
    AudioPipeline, Element, EventKind, HardwareError, I2sLease, I2sPort, MusicInfo,
    PipelineEvent, PipelineFactory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPipelineState {
    Created,
    Linked,
    Running,
    Paused,
    Stopping,
    Stopped,
    Terminated,
    /// Reset after terminate, may run again.
    Ready,
    Released,
}

#[derive(Debug, Default)]
struct Shared {
    created: usize,
    live: usize,
    runs: usize,
    pending: VecDeque<PipelineEvent>,
    last_uri: Option<String>,
    i2s_clock: Option<MusicInfo>,
}

/// Hands out [`SimPipeline`]s that share one simulated I2S port.
#[derive(Debug, Clone, Default)]
pub struct SimPipelineFactory {
    port: I2sPort,
    shared: Arc<Mutex<Shared>>,
}

impl SimPipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines created and not yet released.
    pub fn live_pipelines(&self) -> usize {
        lock(&self.shared).live
    }

    pub fn created(&self) -> usize {
        lock(&self.shared).created
    }

    pub fn runs(&self) -> usize {
        lock(&self.shared).runs
    }

    pub fn i2s_claimed(&self) -> bool {
        self.port.is_claimed()
    }

    /// Queue an event for whichever pipeline listens next.
    pub fn inject(&self, event: PipelineEvent) {
        lock(&self.shared).pending.push_back(event);
    }

    pub fn last_uri(&self) -> Option<String> {
        lock(&self.shared).last_uri.clone()
    }

    pub fn i2s_clock(&self) -> Option<MusicInfo> {
        lock(&self.shared).i2s_clock
    }
}

impl PipelineFactory for SimPipelineFactory {
    fn create(&self) -> Result<Box<dyn AudioPipeline>, HardwareError> {
        {
            let mut shared = lock(&self.shared);
            shared.created += 1;
            shared.live += 1;
        }
        Ok(Box::new(SimPipeline {
            port: self.port.clone(),
            shared: self.shared.clone(),
            state: SimPipelineState::Created,
            elements: Vec::new(),
            listening: false,
            lease: None,
            local: VecDeque::new(),
        }))
    }
}

/// Pipeline that enforces the element lifecycle and produces the events a
/// real decoder chain would.
pub struct SimPipeline {
    port: I2sPort,
    shared: Arc<Mutex<Shared>>,
    state: SimPipelineState,
    elements: Vec<(&'static str, Element)>,
    listening: bool,
    lease: Option<I2sLease>,
    local: VecDeque<PipelineEvent>,
}

const STREAM_INFO: MusicInfo = MusicInfo {
    sample_rate: 44_100,
    bits: 16,
    channels: 2,
};

impl SimPipeline {
    fn alive(&self) -> Result<(), HardwareError> {
        if self.state == SimPipelineState::Released {
            return Err(HardwareError::InvalidState("pipeline released"));
        }
        Ok(())
    }

    fn is_moving(&self) -> bool {
        matches!(
            self.state,
            SimPipelineState::Running | SimPipelineState::Paused | SimPipelineState::Stopping
        )
    }

    fn element(&self, tag: &str) -> Option<Element> {
        self.elements
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|&(_, e)| e)
    }
}

impl AudioPipeline for SimPipeline {
    fn register(&mut self, element: Element, tag: &'static str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.state != SimPipelineState::Created {
            return Err(HardwareError::InvalidState("register after link"));
        }
        if self.element(tag).is_some() {
            return Err(HardwareError::InvalidState("duplicate element tag"));
        }
        if element.uses_i2s() && self.lease.is_none() {
            self.lease = Some(self.port.claim()?);
        }
        self.elements.push((tag, element));
        Ok(())
    }

    fn link(&mut self, tags: &[&'static str]) -> Result<(), HardwareError> {
        self.alive()?;
        if self.state != SimPipelineState::Created {
            return Err(HardwareError::InvalidState("pipeline already linked"));
        }
        if tags.is_empty() {
            return Err(HardwareError::Config("empty link"));
        }
        if tags.iter().any(|t| self.element(t).is_none()) {
            return Err(HardwareError::InvalidState("link of unregistered element"));
        }
        self.state = SimPipelineState::Linked;
        Ok(())
    }

    fn set_listener(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        self.listening = true;
        Ok(())
    }

    fn run(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if !matches!(
            self.state,
            SimPipelineState::Linked | SimPipelineState::Ready
        ) {
            return Err(HardwareError::InvalidState("run from wrong state"));
        }
        self.state = SimPipelineState::Running;
        lock(&self.shared).runs += 1;

        for &(tag, element) in &self.elements {
            if matches!(element, Element::Mp3Decoder | Element::A2dpReader) {
                self.local.push_back(PipelineEvent {
                    source: tag,
                    kind: EventKind::MusicInfo(STREAM_INFO),
                });
            }
        }
        trace!("sim pipeline: running {} elements", self.elements.len());
        Ok(())
    }

    fn pause(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.state != SimPipelineState::Running {
            return Err(HardwareError::InvalidState("pause while not running"));
        }
        self.state = SimPipelineState::Paused;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.state != SimPipelineState::Paused {
            return Err(HardwareError::InvalidState("resume while not paused"));
        }
        self.state = SimPipelineState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if matches!(
            self.state,
            SimPipelineState::Running | SimPipelineState::Paused
        ) {
            self.state = SimPipelineState::Stopping;
        }
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.state == SimPipelineState::Stopping {
            self.state = SimPipelineState::Stopped;
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.is_moving() {
            return Err(HardwareError::InvalidState("terminate while running"));
        }
        self.state = SimPipelineState::Terminated;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if !matches!(
            self.state,
            SimPipelineState::Terminated | SimPipelineState::Stopped
        ) {
            return Err(HardwareError::InvalidState("reset while running"));
        }
        self.local.clear();
        self.state = SimPipelineState::Ready;
        Ok(())
    }

    fn set_uri(&mut self, tag: &'static str, uri: &str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.element(tag) != Some(Element::HttpReader) {
            return Err(HardwareError::Config("uri on a non-http element"));
        }
        lock(&self.shared).last_uri = Some(uri.to_owned());
        Ok(())
    }

    fn set_i2s_clock(&mut self, info: MusicInfo) -> Result<(), HardwareError> {
        self.alive()?;
        if self.lease.is_none() {
            return Err(HardwareError::InvalidState("no i2s element"));
        }
        lock(&self.shared).i2s_clock = Some(info);
        Ok(())
    }

    fn listen(&mut self, _timeout: Duration) -> Result<Option<PipelineEvent>, HardwareError> {
        self.alive()?;
        if !self.listening {
            return Ok(None);
        }
        if let Some(event) = self.local.pop_front() {
            return Ok(Some(event));
        }
        Ok(lock(&self.shared).pending.pop_front())
    }

    fn remove_listener(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        self.listening = false;
        self.local.clear();
        Ok(())
    }

    fn unregister(&mut self, tag: &'static str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.is_moving() {
            return Err(HardwareError::InvalidState("unregister while running"));
        }
        let before = self.elements.len();
        self.elements.retain(|(t, _)| *t != tag);
        if self.elements.len() == before {
            return Err(HardwareError::InvalidState("unregister of unknown element"));
        }
        if !self.elements.iter().any(|(_, e)| e.uses_i2s()) {
            self.lease = None;
        }
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.is_moving() {
            return Err(HardwareError::InvalidState("deinit while running"));
        }
        self.elements.clear();
        self.lease = None;
        self.listening = false;
        self.state = SimPipelineState::Released;
        lock(&self.shared).live -= 1;
        Ok(())
    }
}

impl Drop for SimPipeline {
    fn drop(&mut self) {
        if self.state != SimPipelineState::Released {
            warn!("sim pipeline dropped without deinit");
            lock(&self.shared).live -= 1;
        }
    }
}
