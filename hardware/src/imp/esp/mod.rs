use std::sync::Arc;

use esp_idf_hal::gpio::IOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::sys::EspError;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;

use crate::{Board, HardwareError};

mod bluetooth;
mod pipeline;
mod storage;
mod tuner;
mod wifi;

use bluetooth::EspBluetooth;
use pipeline::{EspPipelineFactory, I2sPins};
use storage::NvsStorage;
use tuner::Si4735;
use wifi::EspWifiLink;

pub fn init_board() -> Result<Board, HardwareError> {
    let peripherals = Peripherals::take().map_err(map_board_err)?;
    let sysloop = EspSystemEventLoop::take().map_err(map_board_err)?;
    let nvs = EspDefaultNvsPartition::take().map_err(map_board_err)?;

    let (wifi_modem, bt_modem) = peripherals.modem.split();
    let wifi = EspWifi::new(wifi_modem, sysloop, Some(nvs.clone())).map_err(wifi::map_wifi_err)?;

    let tuner = Si4735::new()?;
    let bluetooth = EspBluetooth::new(bt_modem, nvs.clone());

    // Shared with the tuner's digital audio output.
    let pins = peripherals.pins;
    let i2s = I2sPins {
        bclk: pins.gpio33.downgrade(),
        ws: pins.gpio25.downgrade(),
        din: pins.gpio32.downgrade(),
        dout: pins.gpio26.downgrade(),
    };
    let pipelines = EspPipelineFactory::new(peripherals.i2s0, i2s);

    log::info!("board up, {} bytes heap free", free_heap_bytes());

    Ok(Board::from_parts(
        Box::new(tuner),
        Box::new(bluetooth),
        Box::new(EspWifiLink::new(wifi)),
        Box::new(NvsStorage::new(nvs)),
        Arc::new(pipelines),
    ))
}

pub fn free_heap_bytes() -> u32 {
    unsafe { esp_idf_svc::sys::esp_get_free_heap_size() }
}

fn map_board_err(err: EspError) -> HardwareError {
    // Logged in full; the enum just carries a coarse category.
    log::error!("board init error: {:?}", err);
    HardwareError::InvalidState("board init")
}

pub(super) fn map_audio_err(err: EspError) -> HardwareError {
    log::error!("audio error: {:?}", err);
    HardwareError::Audio("i2s")
}
