use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use super::lock;
use crate::{HardwareError, WifiLink};

#[derive(Debug)]
struct WifiState {
    reachable: bool,
    connected: bool,
    connects: usize,
}

#[derive(Debug, Clone)]
pub struct SimWifi {
    state: Arc<Mutex<WifiState>>,
}

impl Default for SimWifi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWifi {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WifiState {
                reachable: true,
                connected: false,
                connects: 0,
            })),
        }
    }

    /// Make the access point (dis)appear.
    pub fn set_reachable(&self, reachable: bool) {
        let mut s = lock(&self.state);
        s.reachable = reachable;
        if !reachable {
            s.connected = false;
        }
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }
}

impl WifiLink for SimWifi {
    fn connect(
        &mut self,
        ssid: &str,
        _password: &str,
        timeout: Duration,
    ) -> Result<(), HardwareError> {
        if ssid.is_empty() {
            return Err(HardwareError::Config("SSID empty"));
        }
        if ssid.len() > 32 {
            return Err(HardwareError::Config("SSID too long"));
        }
        let mut s = lock(&self.state);
        if !s.reachable {
            debug!("sim wifi: '{ssid}' not reachable within {timeout:?}");
            return Err(HardwareError::Wifi("connect timeout"));
        }
        s.connected = true;
        s.connects += 1;
        debug!("sim wifi: connected to '{ssid}'");
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.state).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
