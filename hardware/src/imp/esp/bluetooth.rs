//! Classic Bluetooth: A2DP sink plus AVRCP controller for the remote keys.
//!
//! Bluedroid calls back from its own task, so connection state, the PCM
//! hand-off and track metadata live in statics the callbacks can reach.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Mutex;

use esp_idf_hal::modem::BluetoothModem;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::{self as sys, EspError};
use esp_idf_svc::bt::{BtClassic, BtDriver};
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::{Bluetooth, HardwareError, Passthrough, TrackMeta};

static CONNECTED: AtomicBool = AtomicBool::new(false);
static TRANSACTION: AtomicU8 = AtomicU8::new(0);
static PCM_SINK: Mutex<Option<SyncSender<Vec<u8>>>> = Mutex::new(None);
static META_SINK: Mutex<Option<SyncSender<TrackMeta>>> = Mutex::new(None);
static META: Mutex<TrackMeta> = Mutex::new(TrackMeta {
    title: heapless::String::new(),
    artist: heapless::String::new(),
    album: heapless::String::new(),
});

/// Route received A2DP audio to `tx`, or drop it when `None`.
pub(super) fn set_pcm_sink(tx: Option<SyncSender<Vec<u8>>>) {
    *PCM_SINK.lock().unwrap_or_else(|e| e.into_inner()) = tx;
}

/// Route AVRCP track metadata to `tx`, or drop it when `None`.
pub(super) fn set_meta_sink(tx: Option<SyncSender<TrackMeta>>) {
    *META_SINK.lock().unwrap_or_else(|e| e.into_inner()) = tx;
}

fn next_transaction() -> u8 {
    TRANSACTION.fetch_add(1, Ordering::Relaxed) & 0x0F
}

fn fit<const N: usize>(text: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
err: EspError) -> HardwareError {
    log::error!("Bluetooth error: {:?}", err);
    HardwareError::Bluetooth("bluedroid")
}

unsafe extern "C" fn a2dp_event(event: sys::esp_a2d_cb_event_t, param: *mut sys::esp_a2d_cb_param_t) {
    if event == sys::esp_a2d_cb_event_t_ESP_A2D_CONNECTION_STATE_EVT && !param.is_null() {
        let state = (*param).conn_stat.state;
        let connected = state == sys::esp_a2d_connection_state_t_ESP_A2D_CONNECTION_STATE_CONNECTED;
        CONNECTED.store(connected, Ordering::Release);
        log::info!("a2dp: {}", if connected { "connected" } else { "disconnected" });
    }
}

unsafe extern "C" fn a2dp_data(data: *const u8, len: u32) {
    if data.is_null() || len == 0 {
        return;
    }
    let Ok(sink) = PCM_SINK.try_lock() else {
        return;
    };
    if let Some(tx) = sink.as_ref() {
        let pcm = core::slice::from_raw_parts(data, len as usize).to_vec();
        // full queue: drop rather than stall the bluedroid task
        let _ = tx.try_send(pcm);
    }
}

unsafe fn request_metadata() {
    let mask = sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_TITLE
        | sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_ARTIST
        | sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_ALBUM;
    let _ = sys::esp_avrc_ct_send_metadata_cmd(next_transaction(), mask as u8);
}

unsafe fn watch_track_change() {
    let _ = sys::esp_avrc_ct_send_register_notification_cmd(
        next_transaction(),
        sys::esp_avrc_rn_event_ids_t_ESP_AVRC_RN_TRACK_CHANGE as u8,
        0,
    );
}

unsafe extern "C" fn avrc_event(event: sys::esp_avrc_ct_cb_event_t, param: *mut sys::esp_avrc_ct_cb_param_t) {
    if param.is_null() {
        return;
    }
    match event {
        sys::esp_avrc_ct_cb_event_t_ESP_AVRC_CT_CONNECTION_STATE_EVT => {
            if (*param).conn_stat.connected {
                request_metadata();
                watch_track_change();
            } else {
                *META.lock().unwrap_or_else(|e| e.into_inner()) = TrackMeta::default();
            }
        }
        sys::esp_avrc_ct_cb_event_t_ESP_AVRC_CT_CHANGE_NOTIFY_EVT => {
            let id = u32::from((*param).change_ntf.event_id);
            if id == sys::esp_avrc_rn_event_ids_t_ESP_AVRC_RN_TRACK_CHANGE {
                request_metadata();
                // notifications fire once per registration
                watch_track_change();
            }
        }
        sys::esp_avrc_ct_cb_event_t_ESP_AVRC_CT_METADATA_RSP_EVT => {
            let rsp = &(*param).meta_rsp;
            if rsp.attr_text.is_null() {
                return;
            }
            let raw = core::slice::from_raw_parts(rsp.attr_text, rsp.attr_length.max(0) as usize);
            let text = String::from_utf8_lossy(raw);

            let mut meta = META.lock().unwrap_or_else(|e| e.into_inner());
            match u32::from(rsp.attr_id) {
                sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_TITLE => meta.title = fit(&text),
                sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_ARTIST => meta.artist = fit(&text),
                sys::esp_avrc_md_attr_mask_t_ESP_AVRC_MD_ATTR_ALBUM => meta.album = fit(&text),
                _ => return,
            }
            let Ok(sink) = META_SINK.try_lock() else {
                return;
            };
            if let Some(tx) = sink.as_ref() {
                let _ = tx.try_send(meta.clone());
            }
        }
        _ => {}
    }
}

pub struct EspBluetooth {
    modem: BluetoothModem,
    nvs: EspDefaultNvsPartition,
    driver: Option<BtDriver<'static, BtClassic>>,
}

impl EspBluetooth {
    pub fn new(modem: BluetoothModem, nvs: EspDefaultNvsPartition) -> Self {
        Self {
            modem,
            nvs,
            driver: None,
        }
    }

    fn start_profiles(name: &str) -> Result<(), HardwareError> {
        let cname = CString::new(name).map_err(|_| HardwareError::Config("device name"))?;
        unsafe {
            EspError::convert(sys::esp_bt_dev_set_device_name(cname.as_ptr())).map_err(map_bt_err)?;

            EspError::convert(sys::esp_avrc_ct_register_callback(Some(avrc_event))).map_err(map_bt_err)?;
            EspError::convert(sys::esp_avrc_ct_init()).map_err(map_bt_err)?;

            EspError::convert(sys::esp_a2d_register_callback(Some(a2dp_event))).map_err(map_bt_err)?;
            EspError::convert(sys::esp_a2d_sink_register_data_callback(Some(a2dp_data)))
                .map_err(map_bt_err)?;
            EspError::convert(sys::esp_a2d_sink_init()).map_err(map_bt_err)?;

            EspError::convert(sys::esp_bt_gap_set_scan_mode(
                sys::esp_bt_connection_mode_t_ESP_BT_CONNECTABLE,
                sys::esp_bt_discovery_mode_t_ESP_BT_GENERAL_DISCOVERABLE,
            ))
            .map_err(map_bt_err)?;
        }
        Ok(())
    }

    fn stop_profiles() {
        unsafe {
            let _ = sys::esp_bt_gap_set_scan_mode(
                sys::esp_bt_connection_mode_t_ESP_BT_NON_CONNECTABLE,
                sys::esp_bt_discovery_mode_t_ESP_BT_NON_DISCOVERABLE,
            );
            let _ = sys::esp_a2d_sink_deinit();
            let _ = sys::esp_avrc_ct_deinit();
        }
    }
}

impl Bluetooth for EspBluetooth {
    fn enable(&mut self, name: &str) -> Result<(), HardwareError> {
        if self.driver.is_some() {
            return Err(HardwareError::InvalidState("controller already enabled"));
        }
        // The driver is always dropped before the modem is handed out again.
        let modem = unsafe { self.modem.clone_unchecked() };
        let driver = BtDriver::<BtClassic>::new(modem, Some(self.nvs.clone())).map_err(map_bt_err)?;
        self.driver = Some(driver);

        if let Err(err) = Self::start_profiles(name) {
            self.disable();
            return Err(err);
        }
        log::info!("bt: discoverable as {name}");
        Ok(())
    }

    fn disable(&mut self) {
        if self.driver.is_none() {
            return;
        }
        Self::stop_profiles();
        set_pcm_sink(None);
        set_meta_sink(None);
        CONNECTED.store(false, Ordering::Release);
        self.driver = None;
    }

    fn is_enabled(&self) -> bool {
        self.driver.is_some()
    }

    fn is_connected(&self) -> bool {
        self.driver.is_some() && CONNECTED.load(Ordering::Acquire)
    }

    fn send_passthrough(&mut self, cmd: Passthrough) -> Result<(), HardwareError> {
        if self.driver.is_none() {
            return Err(HardwareError::InvalidState("controller disabled"));
        }
        if !CONNECTED.load(Ordering::Acquire) {
            return Err(HardwareError::Bluetooth("no source connected"));
        }
        let key = match cmd {
            Passthrough::Play => sys::esp_avrc_pt_cmd_t_ESP_AVRC_PT_CMD_PLAY,
            Passthrough::Pause => sys::esp_avrc_pt_cmd_t_ESP_AVRC_PT_CMD_PAUSE,
            Passthrough::Stop => sys::esp_avrc_pt_cmd_t_ESP_AVRC_PT_CMD_STOP,
            Passthrough::Forward => sys::esp_avrc_pt_cmd_t_ESP_AVRC_PT_CMD_FORWARD,
            Passthrough::Backward => sys::esp_avrc_pt_cmd_t_ESP_AVRC_PT_CMD_BACKWARD,
        };
        for state in [
            sys::esp_avrc_pt_cmd_state_t_ESP_AVRC_PT_CMD_STATE_PRESSED,
            sys::esp_avrc_pt_cmd_state_t_ESP_AVRC_PT_CMD_STATE_RELEASED,
        ] {
            let err = unsafe { sys::esp_avrc_ct_send_passthrough_cmd(next_transaction(), key as u8, state as u8) };
            EspError::convert(err).map_err(map_bt_err)?;
        }
        Ok(())
    }
}
