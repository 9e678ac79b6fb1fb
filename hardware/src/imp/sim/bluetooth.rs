use std::sync::{Arc, Mutex};

use log::debug;

use super::lock;
use crate::{Bluetooth, HardwareError, Passthrough};

#[derive(Debug, Default)]
struct BtState {
    enabled: bool,
    enables: usize,
    name: Option<String>,
    connected: bool,
    sent: Vec<Passthrough>,
}

#[derive(Debug, Clone, Default)]
pub struct SimBluetooth {
    state: Arc<Mutex<BtState>>,
}

impl SimBluetooth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a phone connected or went away.
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn enable_count(&self) -> usize {
        lock(&self.state).enables
    }

    pub fn device_name(&self) -> Option<String> {
        lock(&self.state).name.clone()
    }

    pub fn sent(&self) -> Vec<Passthrough> {
        lock(&self.state).sent.clone()
    }
}

impl Bluetooth for SimBluetooth {
    fn enable(&mut self, name: &str) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if s.enabled {
            return Err(HardwareError::InvalidState("controller already enabled"));
        }
        debug!("sim bt: discoverable as {name}");
        s.enabled = true;
        s.enables += 1;
        s.name = Some(name.to_owned());
        Ok(())
    }

    fn disable(&mut self) {
        let mut s = lock(&self.state);
        s.enabled = false;
        s.connected = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled()
    }

    fn is_connected(&self) -> bool {
        let s = lock(&self.state);
        s.enabled && s.connected
    }

    fn send_passthrough(&mut self, cmd: Passthrough) -> Result<(), HardwareError> {
        let mut s = lock(&self.state);
        if !s.enabled {
            return Err(HardwareError::InvalidState("controller disabled"));
        }
        if !s.connected {
            return Err(HardwareError::Bluetooth("no source connected"));
        }
        s.sent.push(cmd);
        Ok(())
    }
}
