use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use boombox_core::{queue, ArbiterError, PlayerArbiter, Playlist};
use hardware::{free_heap_bytes, Board, HardwareError};
use log::{debug, info, warn};
use thiserror::Error;

use crate::players::{AirPlayer, BtPlayer, HttpPlayer, WifiCredentials};
use crate::storage::NvsConfigStore;
use crate::tasks::{
    boombox::BoomboxTask,
    task::{start_all, AppTask},
    ui::{stdin_lines, UiTask},
};

pub mod console;
pub mod players;
mod settings;
pub mod storage;
mod tasks;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Arbiter(#[from] ArbiterError),
    #[error("task spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The station list from the playlist file, or just the built-in stream
/// when there is no usable file.
fn load_playlist() -> Playlist {
    let path = settings::SETTINGS.playlist_path;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let playlist = Playlist::parse(&text);
            if !playlist.is_empty() {
                info!("{} stations from {path}", playlist.count());
                return playlist;
            }
            warn!("{path} lists no stations");
        }
        Err(err) => warn!("no playlist at {path}: {err}"),
    }

    let mut playlist = Playlist::new();
    if let Err(err) = playlist.add(
        settings::SETTINGS.default_stream_title,
        settings::SETTINGS.default_stream_url,
    ) {
        warn!("default stream rejected: {err}");
    }
    playlist
}

pub fn run() -> Result<(), AppError> {
    info!("starting boombox");

    let mut board = Board::init()?;
    let pipelines = board.pipelines();

    let air = AirPlayer::new(board.take_tuner()?, pipelines.clone());
    let bt = BtPlayer::new(
        board.take_bluetooth()?,
        pipelines.clone(),
        settings::SETTINGS.bt_device_name,
    );
    let web = HttpPlayer::new(
        board.take_wifi()?,
        pipelines,
        load_playlist(),
        WifiCredentials {
            ssid: settings::SETTINGS.wifi_ssid.into(),
            password: settings::SETTINGS.wifi_password.into(),
        },
    );
    let store = NvsConfigStore::new(board.take_storage()?);

    let arbiter = PlayerArbiter::new(Box::new(air), Box::new(bt), Box::new(web), store)?;
    let start_mode = arbiter.current_source();

    let (gui_tx, gui_rx) = queue::gui_to_boombox();
    let (status_tx, status_rx) = queue::boombox_to_gui();
    let (exit_tx, exit_rx) = mpsc::channel();

    let ui = UiTask::new(gui_tx, status_rx, stdin_lines(), start_mode);
    #[cfg(target_os = "espidf")]
    let ui = ui.stay_after_input_ends();

    let tasks: Vec<Box<dyn AppTask>> = vec![
        Box::new(BoomboxTask::new(arbiter, gui_rx, status_tx, exit_tx)),
        Box::new(ui),
    ];
    start_all(tasks)?;

    loop {
        match exit_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("boombox task ended");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => debug!("free heap {} bytes", free_heap_bytes()),
        }
    }
}
