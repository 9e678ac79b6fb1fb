//! Persisted boombox configuration.
//!
//! The configuration lives in NVS as a single blob. The blob starts with the
//! magic `BBX` and a layout version byte, followed by little-endian fields,
//! so a firmware that changes the layout can tell old data apart instead of
//! misreading it.

use log::{info, warn};
use thiserror::Error;

use crate::protocol::Mode;

pub const NVS_NAMESPACE: &str = "boombox_cfg";
pub const CONFIG_KEY: &str = "config";

pub const MAGIC: [u8; 3] = *b"BBX";
pub const LAYOUT_VERSION: u8 = 1;

/// Slots in one band's station memory.
pub const MAX_STATIONS: usize = 50;
/// Highest tuner volume.
pub const MAX_VOLUME: u8 = 63;
pub const MAX_AGC_ATTENUATION: u8 = 36;

const HEADER_LEN: usize = 4;
const AIR_LEN: usize = 16;
const MEMORY_LEN: usize = 1 + 2 * MAX_STATIONS;
pub const BLOB_LEN: usize = HEADER_LEN + 1 + AIR_LEN + BandType::ALL.len() * MEMORY_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored blob is {0} bytes, larger than expected")]
    TooLarge(usize),
    #[error("storage write failed: {0}")]
    Write(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config blob has no BBX header")]
    BadMagic,
    #[error("config layout version {0} is not supported")]
    UnsupportedVersion(u8),
    #[error("config blob truncated at {0} bytes")]
    Truncated(usize),
    #[error("config field {0} holds an invalid value")]
    InvalidField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw blob persistence, typically one NVS key.
pub trait ConfigStore {
    /// Copy the stored blob into `buf`. `Ok(None)` when nothing is stored yet.
    fn load_blob(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError>;
    /// Write and commit the blob.
    fn save_blob(&mut self, data: &[u8]) -> Result<(), StoreError>;
}

impl<S: ConfigStore + ?Sized> ConfigStore for &mut S {
    fn load_blob(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        (**self).load_blob(buf)
    }

    fn save_blob(&mut self, data: &[u8]) -> Result<(), StoreError> {
        (**self).save_blob(data)
    }
}

/// In-memory store for host runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blob: Option<Vec<u8>>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: &[u8]) -> Self {
        Self {
            blob: Some(blob.to_vec()),
            saves: 0,
        }
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl ConfigStore for MemoryStore {
    fn load_blob(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        let Some(blob) = &self.blob else {
            return Ok(None);
        };
        if blob.len() > buf.len() {
            return Err(StoreError::TooLarge(blob.len()));
        }
        buf[..blob.len()].copy_from_slice(blob);
        Ok(Some(blob.len()))
    }

    fn save_blob(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.blob = Some(data.to_vec());
        self.saves += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BandType {
    Lw = 0,
    Mw = 1,
    Sw = 2,
    #[default]
    Fm = 3,
}

impl BandType {
    pub const ALL: [BandType; 4] = [BandType::Lw, BandType::Mw, BandType::Sw, BandType::Fm];

    pub fn label(self) -> &'static str {
        match self {
            BandType::Lw => "LW",
            BandType::Mw => "MW",
            BandType::Sw => "SW",
            BandType::Fm => "FM",
        }
    }

    /// Tuning range, FM in 10 kHz units and everything else in kHz.
    pub fn limits(self) -> (u16, u16) {
        match self {
            BandType::Lw => (153, 279),
            BandType::Mw => (520, 1710),
            BandType::Sw => (1711, 30000),
            BandType::Fm => (8750, 10800),
        }
    }

    pub fn default_frequency(self) -> u16 {
        match self {
            BandType::Lw => 198,
            BandType::Mw => 1008,
            BandType::Sw => 9600,
            BandType::Fm => 10030,
        }
    }

    pub fn default_modulation(self) -> Modulation {
        match self {
            BandType::Fm => Modulation::Fm,
            _ => Modulation::Am,
        }
    }

    pub fn contains(self, frequency: u16) -> bool {
        let (lo, hi) = self.limits();
        (lo..=hi).contains(&frequency)
    }

    pub fn clamp(self, frequency: u16) -> u16 {
        let (lo, hi) = self.limits();
        frequency.clamp(lo, hi)
    }
}

impl TryFrom<u8> for BandType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BandType::Lw),
            1 => Ok(BandType::Mw),
            2 => Ok(BandType::Sw),
            3 => Ok(BandType::Fm),
            other => Err(other),
        }
    }
}

/// Demodulator. The discriminants are the byte stored in the config blob
/// and sent by the GUI; they follow the shared modulation table
/// (AM, LSB, USB, CW, FM), not the order of the GUI's mode buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Modulation {
    Am = 0,
    Lsb = 1,
    Usb = 2,
    Cw = 3,
    #[default]
    Fm = 4,
}

impl Modulation {
    pub fn label(self) -> &'static str {
        match self {
            Modulation::Am => "AM",
            Modulation::Lsb => "LSB",
            Modulation::Usb => "USB",
            Modulation::Cw => "CW",
            Modulation::Fm => "FM",
        }
    }

    pub fn is_ssb(self) -> bool {
        matches!(self, Modulation::Lsb | Modulation::Usb | Modulation::Cw)
    }
}

impl TryFrom<u8> for Modulation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Modulation::Am),
            1 => Ok(Modulation::Lsb),
            2 => Ok(Modulation::Usb),
            3 => Ok(Modulation::Cw),
            4 => Ok(Modulation::Fm),
            other => Err(other),
        }
    }
}

/// Slider position (0..=100) to tuner volume (0..=63).
pub fn slider_to_volume(slider: u8) -> u8 {
    (slider.min(100) as u16 * MAX_VOLUME as u16 / 100) as u8
}

/// Tuner volume (0..=63) to the nearest slider position.
pub fn volume_to_slider(volume: u8) -> u8 {
    let v = volume.min(MAX_VOLUME) as u16;
    ((v * 100 + MAX_VOLUME as u16 / 2) / MAX_VOLUME as u16) as u8
}

/// Stations found by a scan of one band. Slots are filled from the front,
/// zero marks an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationMemory {
    pub current: u8,
    pub stations: [u16; MAX_STATIONS],
}

impl Default for StationMemory {
    fn default() -> Self {
        Self {
            current: 0,
            stations: [0; MAX_STATIONS],
        }
    }
}

impl StationMemory {
    pub fn count(&self) -> usize {
        self.stations.iter().take_while(|&&f| f != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn current_frequency(&self) -> Option<u16> {
        let count = self.count();
        (count > 0).then(|| self.stations[self.current as usize % count])
    }

    pub fn next(&mut self) -> Option<u16> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        self.current = ((self.current as usize + 1) % count) as u8;
        Some(self.stations[self.current as usize])
    }

    pub fn previous(&mut self) -> Option<u16> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        self.current = ((self.current as usize + count - 1) % count) as u8;
        Some(self.stations[self.current as usize])
    }

    /// Replace the memory with a fresh scan result. Zero frequencies and
    /// anything past the last slot are ignored.
    pub fn store_scan(&mut self, found: &[u16]) -> usize {
        self.clear();
        let mut n = 0;
        for &freq in found.iter().filter(|&&f| f != 0).take(MAX_STATIONS) {
            self.stations[n] = freq;
            n += 1;
        }
        n
    }

    /// Point `current` at `frequency` if it is stored.
    pub fn select(&mut self, frequency: u16) -> bool {
        match self.stations[..self.count()].iter().position(|&f| f == frequency) {
            Some(idx) => {
                self.current = idx as u8;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirRadioConfig {
    pub band: BandType,
    pub modulation: Modulation,
    /// FM spacing in 10 kHz units.
    pub step_fm: u16,
    /// AM spacing in kHz.
    pub step_am: u16,
    pub frequency: u16,
    /// Tuner scale, 0..=63.
    pub volume: u8,
    pub bandwidth_fm: u8,
    pub bandwidth_am: u8,
    pub bandwidth_ssb: u8,
    pub agc_attenuation: u8,
    pub agc_enabled: bool,
    pub rssi_threshold: u8,
    pub snr_threshold: u8,
    pub memories: [StationMemory; 4],
}

impl Default for AirRadioConfig {
    fn default() -> Self {
        Self {
            band: BandType::Fm,
            modulation: Modulation::Fm,
            step_fm: 1,
            step_am: 1,
            frequency: BandType::Fm.default_frequency(),
            volume: 60,
            bandwidth_fm: 0,
            bandwidth_am: 0,
            bandwidth_ssb: 0,
            agc_attenuation: MAX_AGC_ATTENUATION,
            agc_enabled: false,
            rssi_threshold: 15,
            snr_threshold: 8,
            memories: [StationMemory::default(); 4],
        }
    }
}

impl AirRadioConfig {
    pub fn memory(&self, band: BandType) -> &StationMemory {
        &self.memories[band as usize]
    }

    pub fn memory_mut(&mut self, band: BandType) -> &mut StationMemory {
        &mut self.memories[band as usize]
    }

    /// Step for the current band.
    pub fn step(&self) -> u16 {
        match self.band {
            BandType::Fm => self.step_fm,
            _ => self.step_am,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoomboxConfig {
    pub mode: Mode,
    pub air: AirRadioConfig,
}

impl BoomboxConfig {
    pub fn encode(&self) -> [u8; BLOB_LEN] {
        let mut w = Writer::default();
        w.bytes(&MAGIC);
        w.u8(LAYOUT_VERSION);
        w.u8(self.mode as u8);

        let air = &self.air;
        w.u8(air.band as u8);
        w.u8(air.modulation as u8);
        w.u16(air.step_fm);
        w.u16(air.step_am);
        w.u16(air.frequency);
        w.u8(air.volume);
        w.u8(air.bandwidth_fm);
        w.u8(air.bandwidth_am);
        w.u8(air.bandwidth_ssb);
        w.u8(air.agc_attenuation);
        w.u8(air.agc_enabled as u8);
        w.u8(air.rssi_threshold);
        w.u8(air.snr_threshold);

        for memory in &air.memories {
            w.u8(memory.current);
            for &station in &memory.stations {
                w.u16(station);
            }
        }
        debug_assert_eq!(w.pos, BLOB_LEN);
        w.buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, ConfigError> {
        let mut r = Reader { data, pos: 0 };
        if r.bytes(MAGIC.len())? != MAGIC {
            return Err(ConfigError::BadMagic);
        }
        let version = r.u8()?;
        if version != LAYOUT_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let mode = Mode::try_from(r.u8()?).map_err(|_| ConfigError::InvalidField("mode"))?;
        let band = BandType::try_from(r.u8()?).map_err(|_| ConfigError::InvalidField("band"))?;
        let modulation =
            Modulation::try_from(r.u8()?).map_err(|_| ConfigError::InvalidField("modulation"))?;
        let step_fm = r.u16()?;
        let step_am = r.u16()?;
        let frequency = r.u16()?;
        let volume = r.bounded("volume", MAX_VOLUME)?;
        let bandwidth_fm = r.bounded("bandwidth_fm", 4)?;
        let bandwidth_am = r.bounded("bandwidth_am", 6)?;
        let bandwidth_ssb = r.bounded("bandwidth_ssb", 5)?;
        let agc_attenuation = r.bounded("agc_attenuation", MAX_AGC_ATTENUATION)?;
        let agc_enabled = r.bounded("agc_enabled", 1)? == 1;
        let rssi_threshold = r.u8()?;
        let snr_threshold = r.u8()?;

        if step_fm == 0 {
            return Err(ConfigError::InvalidField("step_fm"));
        }
        if step_am == 0 {
            return Err(ConfigError::InvalidField("step_am"));
        }
        if !band.contains(frequency) {
            return Err(ConfigError::InvalidField("frequency"));
        }

        let mut memories = [StationMemory::default(); 4];
        for memory in &mut memories {
            memory.current = r.bounded("station index", MAX_STATIONS as u8 - 1)?;
            for station in &mut memory.stations {
                *station = r.u16()?;
            }
        }

        Ok(Self {
            mode,
            air: AirRadioConfig {
                band,
                modulation,
                step_fm,
                step_am,
                frequency,
                volume,
                bandwidth_fm,
                bandwidth_am,
                bandwidth_ssb,
                agc_attenuation,
                agc_enabled,
                rssi_threshold,
                snr_threshold,
                memories,
            },
        })
    }

    /// `Ok(None)` when the store holds no configuration yet.
    pub fn load_from<S: ConfigStore + ?Sized>(store: &mut S) -> Result<Option<Self>, ConfigError> {
        let mut buf = [0u8; BLOB_LEN];
        match store.load_blob(&mut buf)? {
            Some(len) => Self::decode(&buf[..len]).map(Some),
            None => Ok(None),
        }
    }

    /// Stored configuration, or the defaults when there is none or it
    /// cannot be read.
    pub fn load_or_default<S: ConfigStore + ?Sized>(store: &mut S) -> Self {
        match Self::load_from(store) {
            Ok(Some(cfg)) => {
                info!(
                    "config: loaded, mode {} band {} freq {}",
                    cfg.mode.label(),
                    cfg.air.band.label(),
                    cfg.air.frequency
                );
                cfg
            }
            Ok(None) => {
                info!("config: nothing stored, using defaults");
                Self::default()
            }
            Err(err) => {
                warn!("config: {err}, using defaults");
                Self::default()
            }
        }
    }

    pub fn save_to<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), ConfigError> {
        store.save_blob(&self.encode())?;
        info!(
            "config: saved, mode {} band {} freq {}",
            self.mode.label(),
            self.air.band.label(),
            self.air.frequency
        );
        Ok(())
    }
}

struct Writer {
    buf: [u8; BLOB_LEN],
    pos: usize,
}

impl Default for Writer {
    fn default() -> Self {
        Self {
            buf: [0; BLOB_LEN],
            pos: 0,
        }
    }
}

impl Writer {
    fn bytes(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn u8(&mut self, v: u8) {
        self.bytes(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ConfigError> {
        let end = self.pos + len;
        let out = self
            .data
            .get(self.pos..end)
            .ok_or(ConfigError::Truncated(self.data.len()))?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ConfigError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ConfigError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn bounded(&mut self, field: &'static str, max: u8) -> Result<u8, ConfigError> {
        let v = self.u8()?;
        if v > max {
            return Err(ConfigError::InvalidField(field));
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuned() -> BoomboxConfig {
        let mut cfg = BoomboxConfig::default();
        cfg.mode = Mode::Web;
        cfg.air.frequency = 10490;
        cfg.air.volume = 42;
        cfg.air.agc_enabled = true;
        cfg.air.agc_attenuation = 12;
        cfg.air.bandwidth_am = 6;
        cfg.air
            .memory_mut(BandType::Fm)
            .store_scan(&[8810, 9470, 10490]);
        cfg.air.memory_mut(BandType::Fm).current = 2;
        cfg.air.memory_mut(BandType::Mw).store_scan(&[549, 1008]);
        cfg
    }

    #[test]
    fn defaults_match_first_boot() {
        let cfg = BoomboxConfig::default();
        assert_eq!(cfg.mode, Mode::Air);
        assert_eq!(cfg.air.band, BandType::Fm);
        assert_eq!(cfg.air.modulation, Modulation::Fm);
        assert_eq!(cfg.air.frequency, 10030);
        assert_eq!(cfg.air.volume, 60);
        assert_eq!(cfg.air.agc_attenuation, 36);
        assert!(!cfg.air.agc_enabled);
        assert_eq!(cfg.air.rssi_threshold, 15);
        assert_eq!(cfg.air.snr_threshold, 8);
        assert!(cfg.air.memories.iter().all(StationMemory::is_empty));
    }

    #[test]
    fn save_then_load_round_trips() {
        let cfg = tuned();
        let mut store = MemoryStore::new();
        cfg.save_to(&mut store).unwrap();

        assert_eq!(store.blob().map(<[u8]>::len), Some(BLOB_LEN));
        assert_eq!(&store.blob().unwrap()[..4], b"BBX\x01");

        let loaded = BoomboxConfig::load_from(&mut store).unwrap().unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.encode(), cfg.encode());
    }

    #[test]
    fn empty_store_yields_defaults() {
        let mut store = MemoryStore::new();
        assert_eq!(BoomboxConfig::load_from(&mut store), Ok(None));
        assert_eq!(BoomboxConfig::load_or_default(&mut store), BoomboxConfig::default());
    }

    #[test]
    fn rejects_foreign_and_damaged_blobs() {
        let blob = tuned().encode();

        let mut bad = blob;
        bad[0] = b'X';
        assert_eq!(BoomboxConfig::decode(&bad), Err(ConfigError::BadMagic));

        let mut bad = blob;
        bad[3] = 2;
        assert_eq!(BoomboxConfig::decode(&bad), Err(ConfigError::UnsupportedVersion(2)));

        assert_eq!(
            BoomboxConfig::decode(&blob[..100]),
            Err(ConfigError::Truncated(100))
        );

        let mut bad = blob;
        bad[4] = 9; // mode
        assert_eq!(BoomboxConfig::decode(&bad), Err(ConfigError::InvalidField("mode")));

        let mut bad = blob;
        bad[13] = 64; // volume
        assert_eq!(BoomboxConfig::decode(&bad), Err(ConfigError::InvalidField("volume")));
    }

    #[test]
    fn damaged_blob_falls_back_to_defaults() {
        let mut store = MemoryStore::with_blob(b"garbage");
        assert_eq!(BoomboxConfig::load_or_default(&mut store), BoomboxConfig::default());
    }

    #[test]
    fn station_memory_wraps_both_ways() {
        let mut mem = StationMemory::default();
        assert_eq!(mem.next(), None);
        assert_eq!(mem.current_frequency(), None);

        assert_eq!(mem.store_scan(&[8810, 0, 9470, 10490]), 3);
        assert_eq!(mem.count(), 3);
        assert_eq!(mem.current_frequency(), Some(8810));
        assert_eq!(mem.next(), Some(9470));
        assert_eq!(mem.next(), Some(10490));
        assert_eq!(mem.next(), Some(8810));
        assert_eq!(mem.previous(), Some(10490));

        assert!(mem.select(9470));
        assert_eq!(mem.current, 1);
        assert!(!mem.select(10000));
    }

    #[test]
    fn scan_beyond_capacity_is_cut() {
        let found: Vec<u16> = (0..60).map(|i| 8750 + i * 10).collect();
        let mut mem = StationMemory::default();
        assert_eq!(mem.store_scan(&found), MAX_STATIONS);
        assert_eq!(mem.count(), MAX_STATIONS);
    }

    #[test]
    fn volume_scales() {
        assert_eq!(slider_to_volume(0), 0);
        assert_eq!(slider_to_volume(100), 63);
        assert_eq!(slider_to_volume(50), 31);
        assert_eq!(volume_to_slider(63), 100);
        assert_eq!(volume_to_slider(60), 95);
        assert_eq!(volume_to_slider(0), 0);
    }

    #[test]
    fn modulation_bytes_follow_the_shared_table() {
        let table = [
            (0, Modulation::Am),
            (1, Modulation::Lsb),
            (2, Modulation::Usb),
            (3, Modulation::Cw),
            (4, Modulation::Fm),
        ];
        for (byte, modulation) in table {
            assert_eq!(modulation as u8, byte);
            assert_eq!(Modulation::try_from(byte), Ok(modulation));
        }
        assert!(Modulation::try_from(5).is_err());
    }
}
