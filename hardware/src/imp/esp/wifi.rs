use std::time::{Duration, Instant};

use esp_idf_hal::sys::EspError;
use esp_idf_svc::wifi::{ClientConfiguration, Configuration, EspWifi};
use heapless::String;

use crate::{HardwareError, WifiLink};

const POLL: Duration = Duration::from_millis(250);

pub fn map_wifi_err(err: EspError) -> HardwareError {
    // We log the detailed error; the enum just carries a coarse category.
    log::error!("Wi-Fi error: {:?}", err);
    HardwareError::Wifi("Wi-Fi error")
}

pub struct EspWifiLink {
    wifi: EspWifi<'static>,
}

impl EspWifiLink {
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self { wifi }
    }

    fn configure(&mut self, ssid: &str, pass: &str) -> Result<(), HardwareError> {
        let mut h_ssid = String::<32>::new();
        h_ssid
            .push_str(ssid)
            .map_err(|_| HardwareError::Config("SSID too long"))?;

        let mut password = String::<64>::new();
        password
            .push_str(pass)
            .map_err(|_| HardwareError::Config("Password too long"))?;

        let config = ClientConfiguration {
            ssid: h_ssid,
            password,
            ..Default::default()
        };

        self.wifi
            .set_configuration(&Configuration::Client(config))
            .map_err(map_wifi_err)
    }

    fn wait_for_ip(&self, deadline: Instant) -> Result<(), HardwareError> {
        loop {
            match self.wifi.sta_netif().get_ip_info() {
                Ok(info) if !info.ip.is_unspecified() => {
                    log::info!("Wi-Fi connected, IP: {}", info.ip);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => log::error!("get_ip_info: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(HardwareError::Wifi("no address"));
            }
            std::thread::sleep(POLL);
        }
    }
}

impl WifiLink for EspWifiLink {
    fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), HardwareError> {
        if ssid.is_empty() {
            return Err(HardwareError::Config("SSID empty"));
        }
        self.configure(ssid, password)?;

        self.wifi.start().map_err(map_wifi_err)?;
        self.wifi.connect().map_err(map_wifi_err)?;

        let deadline = Instant::now() + timeout;
        while !self.wifi.is_connected().map_err(map_wifi_err)? {
            if Instant::now() >= deadline {
                let _ = self.wifi.stop();
                return Err(HardwareError::Wifi("connect timeout"));
            }
            log::debug!("Wi-Fi connecting to \"{ssid}\"...");
            std::thread::sleep(POLL);
        }

        self.wait_for_ip(deadline)
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            log::warn!("Wi-Fi disconnect: {:?}", e);
        }
        if let Err(e) = self.wifi.stop() {
            log::warn!("Wi-Fi stop: {:?}", e);
        }
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }
}
