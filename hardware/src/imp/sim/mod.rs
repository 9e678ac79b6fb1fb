//! Host stand-ins for the boombox peripherals.
//!
//! Each simulation keeps its state behind an `Arc<Mutex<_>>` and is `Clone`,
//! so a test can keep one handle while a backend owns the other.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::{Board, HardwareError};

mod bluetooth;
mod pipeline;
mod storage;
mod tuner;
mod wifi;

pub use bluetooth::SimBluetooth;
pub use pipeline::{SimPipeline, SimPipelineFactory, SimPipelineState};
pub use storage::{FileStorage, MemStorage};
pub use tuner::{SimStation, SimTuner, SimTunerMode};
pub use wifi::SimWifi;

/// Roughly what an ESP32 without PSRAM has left after start-up.
const SIM_HEAP_BYTES: u32 = 180_000;

pub fn init_board() -> Result<Board, HardwareError> {
    let nvs_dir = std::env::var_os("BOOMBOX_NVS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("boombox-nvs"));
    debug!("simulated boombox init: nvs in {}", nvs_dir.display());

    Ok(Board::from_parts(
        Box::new(SimTuner::new(SimTuner::default_stations()).with_noise()),
        Box::new(SimBluetooth::new()),
        Box::new(SimWifi::new()),
        Box::new(FileStorage::new(nvs_dir)),
        Arc::new(SimPipelineFactory::new()),
    ))
}

pub fn free_heap_bytes() -> u32 {
    SIM_HEAP_BYTES - rand::random_range(0..4096)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
