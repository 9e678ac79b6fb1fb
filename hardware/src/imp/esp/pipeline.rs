//! Pipelines on ESP-IDF: a worker thread pumps PCM from the source element
//! into the I2S writer.
//!
//! Supported sources are the HTTP reader, the A2DP sink and the tuner's
//! digital output on the I2S input. HTTP bodies are fetched on a helper
//! thread and decoded from MP3 when the chain carries a decoder element.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::i2s::config::{DataBitWidth, StdConfig};
use esp_idf_hal::i2s::{I2sBiDir, I2sDriver, I2sTx, I2S0};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::EspError;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use esp_idf_svc::http::Method;

use super::bluetooth::{set_meta_sink, set_pcm_sink};
use super::map_audio_err;
use crate::codec::{ChunkReader, Mp3Stream};
use crate::{
    AudioPipeline, Element, ElementStatus, EventKind, HardwareError, I2sLease, I2sPort,
    MusicInfo, PipelineEvent, PipelineFactory,
};

const CHUNK: usize = 2048;
const IO_TIMEOUT: Duration = Duration::from_millis(100);
const EVENT_DEPTH: usize = 8;
const PCM_DEPTH: usize = 8;
const FETCH_STACK: usize = 6 * 1024;

const DEFAULT_CLOCK: MusicInfo = MusicInfo {
    sample_rate: 48_000,
    bits: 16,
    channels: 2,
};

const A2DP_INFO: MusicInfo = MusicInfo {
    sample_rate: 44_100,
    bits: 16,
    channels: 2,
};

pub struct I2sPins {
    pub bclk: AnyIOPin,
    pub ws: AnyIOPin,
    pub din: AnyIOPin,
    pub dout: AnyIOPin,
}

struct Parts {
    i2s: I2S0,
    pins: I2sPins,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct EspPipelineFactory {
    port: I2sPort,
    parts: Arc<Mutex<Parts>>,
}

impl EspPipelineFactory {
    pub fn new(i2s: I2S0, pins: I2sPins) -> Self {
        Self {
            port: I2sPort::new(),
            parts: Arc::new(Mutex::new(Parts { i2s, pins })),
        }
    }
}

impl PipelineFactory for EspPipelineFactory {
    fn create(&self) -> Result<Box<dyn AudioPipeline>, HardwareError> {
        let (events_tx, events_rx) = sync_channel(EVENT_DEPTH);
        Ok(Box::new(EspPipeline {
            port: self.port.clone(),
            parts: self.parts.clone(),
            elements: Vec::new(),
            linked: false,
            listening: false,
            released: false,
            lease: None,
            uri: None,
            clock: Arc::new(Mutex::new(DEFAULT_CLOCK)),
            flags: Arc::new(Flags::default()),
            events_tx,
            events_rx,
            worker: None,
        }))
    }
}

#[derive(Default)]
struct Flags {
    stop: AtomicBool,
    paused: AtomicBool,
}

enum Source {
    Http {
        tag: &'static str,
        uri: String,
        decoder: Option<&'static str>,
    },
    A2dp { tag: &'static str },
    Tuner,
}

enum Driver {
    Out(I2sDriver<'static, I2sTx>),
    Duplex(I2sDriver<'static, I2sBiDir>),
}

impl Driver {
    fn open(parts: &Mutex<Parts>, info: MusicInfo, duplex: bool) -> Result<Self, EspError> {
        let parts = lock(parts);
        let config = StdConfig::philips(info.sample_rate, bit_width(info.bits));
        // Only one driver exists at a time; the I2S lease guarantees it.
        let (i2s, bclk, ws, dout) = unsafe {
            (
                parts.i2s.clone_unchecked(),
                parts.pins.bclk.clone_unchecked(),
                parts.pins.ws.clone_unchecked(),
                parts.pins.dout.clone_unchecked(),
            )
        };
        let mut driver = if duplex {
            let din = unsafe { parts.pins.din.clone_unchecked() };
            let mut d = I2sDriver::<I2sBiDir>::new_std_bidir(
                i2s,
                &config,
                bclk,
                din,
                dout,
                Option::<AnyIOPin>::None,
                ws,
            )?;
            d.rx_enable()?;
            Driver::Duplex(d)
        } else {
            Driver::Out(I2sDriver::<I2sTx>::new_std_tx(
                i2s,
                &config,
                bclk,
                dout,
                Option::<AnyIOPin>::None,
                ws,
            )?)
        };
        driver.tx_enable()?;
        Ok(driver)
    }

    fn tx_enable(&mut self) -> Result<(), EspError> {
        match self {
            Driver::Out(d) => d.tx_enable(),
            Driver::Duplex(d) => d.tx_enable(),
        }
    }

    fn write(&mut self, pcm: &[u8]) -> Result<usize, EspError> {
        let ticks = TickType::from(IO_TIMEOUT).into();
        match self {
            Driver::Out(d) => d.write(pcm, ticks),
            Driver::Duplex(d) => d.write(pcm, ticks),
        }
    }

    fn read(&mut self, pcm: &mut [u8]) -> Result<usize, EspError> {
        match self {
            Driver::Duplex(d) => d.read(pcm, TickType::from(IO_TIMEOUT).into()),
            Driver::Out(_) => Ok(0),
        }
    }
}

fn bit_width(bits: u8) -> DataBitWidth {
    match bits {
        8 => DataBitWidth::Bits8,
        24 => DataBitWidth::Bits24,
        32 => DataBitWidth::Bits32,
        _ => DataBitWidth::Bits16,
    }
}

pub struct EspPipeline {
    port: I2sPort,
    parts: Arc<Mutex<Parts>>,
    elements: Vec<(&'static str, Element)>,
    linked: bool,
    listening: bool,
    released: bool,
    lease: Option<I2sLease>,
    uri: Option<String>,
    clock: Arc<Mutex<MusicInfo>>,
    flags: Arc<Flags>,
    events_tx: SyncSender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    worker: Option<JoinHandle<()>>,
}

impl EspPipeline {
    fn alive(&self) -> Result<(), HardwareError> {
        if self.released {
            return Err(HardwareError::InvalidState("pipeline released"));
        }
        Ok(())
    }

    fn running(&self) -> bool {
        self.worker.is_some()
    }

    fn find(&self, element: Element) -> Option<&'static str> {
        self.elements
            .iter()
            .find(|(_, e)| *e == element)
            .map(|&(tag, _)| tag)
    }

    fn source(&self) -> Result<Source, HardwareError> {
        if let Some(tag) = self.find(Element::HttpReader) {
            let uri = self.uri.clone().ok_or(HardwareError::Config("no uri set"))?;
            let decoder = self.find(Element::Mp3Decoder);
            return Ok(Source::Http { tag, uri, decoder });
        }
        if let Some(tag) = self.find(Element::A2dpReader) {
            return Ok(Source::A2dp { tag });
        }
        if self.find(Element::I2sReader).is_some() {
            return Ok(Source::Tuner);
        }
        Err(HardwareError::Config("pipeline without a source"))
    }
}

struct Worker {
    parts: Arc<Mutex<Parts>>,
    clock: Arc<Mutex<MusicInfo>>,
    flags: Arc<Flags>,
    events: SyncSender<PipelineEvent>,
}

impl Worker {
    fn emit(&self, source: &'static str, kind: EventKind) {
        if self.events.try_send(PipelineEvent { source, kind }).is_err() {
            log::warn!("pipeline: event from {source} dropped");
        }
    }

    fn run(self, source: Source) {
        let (tag, result) = match source {
            Source::Http { tag, uri, decoder } => (tag, self.pump_http(&uri, decoder)),
            Source::A2dp { tag } => (tag, self.pump_a2dp(tag)),
            Source::Tuner => ("i2s_reader", self.pump_tuner()),
        };
        let status = match result {
            Ok(()) if self.flags.stop.load(Ordering::Acquire) => ElementStatus::Stopped,
            Ok(()) => ElementStatus::Finished,
            Err(err) => {
                log::error!("pipeline {tag}: {err}");
                ElementStatus::Error
            }
        };
        self.emit(tag, EventKind::Status(status));
    }

    fn stopped(&self) -> bool {
        self.flags.stop.load(Ordering::Acquire)
    }

    fn hold_while_paused(&self) {
        while self.flags.paused.load(Ordering::Acquire) && !self.stopped() {
            thread::sleep(IO_TIMEOUT);
        }
    }

    /// Reopens the driver when the clock changed since `current`.
    fn refresh(
        &self,
        driver: &mut Option<Driver>,
        current: &mut Option<MusicInfo>,
        duplex: bool,
    ) -> Result<(), HardwareError> {
        let wanted = *lock(&self.clock);
        if *current != Some(wanted) {
            *driver = None;
            *driver = Some(Driver::open(&self.parts, wanted, duplex).map_err(map_audio_err)?);
            *current = Some(wanted);
        }
        Ok(())
    }

    fn write_all(driver: &mut Driver, mut pcm: &[u8]) -> Result<(), HardwareError> {
        while !pcm.is_empty() {
            let n = driver.write(pcm).map_err(map_audio_err)?;
            pcm = &pcm[n..];
        }
        Ok(())
    }

    fn pump_http(&self, uri: &str, decoder: Option<&'static str>) -> Result<(), HardwareError> {
        let (tx, rx) = sync_channel(PCM_DEPTH);
        let flags = self.flags.clone();
        let uri = uri.to_owned();
        thread::Builder::new()
            .name("http_fetch".into())
            .stack_size(FETCH_STACK)
            .spawn(move || fetch(&uri, &flags, &tx))
            .map_err(|_| HardwareError::Audio("http fetch thread"))?;

        let body = ChunkReader::new(rx);
        let result = match decoder {
            Some(tag) => self.play_mp3(tag, body),
            None => self.play_pcm(body),
        };
        // a stop cuts the body short, which is not a stream error
        match result {
            Err(_) if self.stopped() => Ok(()),
            other => other,
        }
    }

    fn play_mp3(&self, tag: &'static str, body: ChunkReader) -> Result<(), HardwareError> {
        let mut stream = Mp3Stream::open(body)?;
        let mut driver = None;
        let mut clock = None;
        let mut announced = None;
        while !self.stopped() {
            self.hold_while_paused();
            let Some(frame) = stream.next_frame()? else {
                return Ok(());
            };
            if announced != Some(frame.info) {
                *lock(&self.clock) = frame.info;
                self.emit(tag, EventKind::MusicInfo(frame.info));
                announced = Some(frame.info);
            }
            self.refresh(&mut driver, &mut clock, false)?;
            if let Some(d) = driver.as_mut() {
                Self::write_all(d, &frame.pcm)?;
            }
        }
        Ok(())
    }

    /// Body without a decoder: raw PCM at the current clock.
    fn play_pcm(&self, mut body: ChunkReader) -> Result<(), HardwareError> {
        let mut driver = None;
        let mut clock = None;
        let mut buf = vec![0u8; CHUNK];
        while !self.stopped() {
            self.hold_while_paused();
            self.refresh(&mut driver, &mut clock, false)?;
            let n = body
                .read(&mut buf)
                .map_err(|_| HardwareError::Audio("http stream"))?;
            if n == 0 {
                return Ok(());
            }
            if let Some(d) = driver.as_mut() {
                Self::write_all(d, &buf[..n])?;
            }
        }
        Ok(())
    }

    fn pump_a2dp(&self, tag: &'static str) -> Result<(), HardwareError> {
        let (tx, rx) = sync_channel::<Vec<u8>>(PCM_DEPTH);
        let (meta_tx, meta_rx) = sync_channel(EVENT_DEPTH);
        set_pcm_sink(Some(tx));
        set_meta_sink(Some(meta_tx));
        self.emit(tag, EventKind::MusicInfo(A2DP_INFO));

        let mut driver = None;
        let mut clock = None;
        let result = loop {
            if self.stopped() {
                break Ok(());
            }
            self.hold_while_paused();
            while let Ok(meta) = meta_rx.try_recv() {
                self.emit(tag, EventKind::Track(meta));
            }
            if let Err(err) = self.refresh(&mut driver, &mut clock, false) {
                break Err(err);
            }
            match rx.recv_timeout(IO_TIMEOUT) {
                Ok(pcm) => {
                    if let Some(d) = driver.as_mut() {
                        if let Err(err) = Self::write_all(d, &pcm) {
                            break Err(err);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break Ok(()),
            }
        };
        set_pcm_sink(None);
        set_meta_sink(None);
        result
    }

    fn pump_tuner(&self) -> Result<(), HardwareError> {
        let mut driver = None;
        let mut clock = None;
        let mut buf = vec![0u8; CHUNK];
        while !self.stopped() {
            self.hold_while_paused();
            self.refresh(&mut driver, &mut clock, true)?;
            let Some(d) = driver.as_mut() else {
                continue;
            };
            let n = d.read(&mut buf).map_err(map_audio_err)?;
            Self::write_all(d, &buf[..n])?;
        }
        Ok(())
    }
}

/// Pulls the HTTP body into `tx` until it ends, the pipeline stops or the
/// decoder hangs up.
fn fetch(uri: &str, flags: &Flags, tx: &SyncSender<io::Result<Vec<u8>>>) {
    let mut conn = match open_http(uri) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = tx.send(Err(io::Error::other(err)));
            return;
        }
    };
    while !flags.stop.load(Ordering::Acquire) {
        let mut chunk = vec![0u8; CHUNK];
        match conn.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                chunk.truncate(n);
                if tx.send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(io::Error::other(map_http_err(err))));
                return;
            }
        }
    }
}

fn open_http(uri: &str) -> Result<EspHttpConnection, HardwareError> {
    let mut conn = EspHttpConnection::new(&HttpConfig {
        buffer_size: Some(CHUNK),
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    })
    .map_err(map_http_err)?;
    conn.initiate_request(Method::Get, uri, &[])
        .map_err(map_http_err)?;
    conn.initiate_response().map_err(map_http_err)?;
    Ok(conn)
}

fn map_http_err(err: EspError) -> HardwareError {
    log::error!("http error: {:?}", err);
    HardwareError::Audio("http stream")
}

impl AudioPipeline for EspPipeline {
    fn register(&mut self, element: Element, tag: &'static str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.linked {
            return Err(HardwareError::InvalidState("register after link"));
        }
        if self.elements.iter().any(|(t, _)| *t == tag) {
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
        if tags
            .iter()
            .any(|tag| !self.elements.iter().any(|(t, _)| t == tag))
        {
            return Err(HardwareError::InvalidState("link of unregistered element"));
        }
        if self.find(Element::I2sWriter).is_none() {
            return Err(HardwareError::Config("pipeline without an I2S writer"));
        }
        self.linked = true;
        Ok(())
    }

    fn set_listener(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        self.listening = true;
        Ok(())
    }

    fn run(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if !self.linked || self.running() {
            return Err(HardwareError::InvalidState("run from wrong state"));
        }
        let source = self.source()?;
        self.flags.stop.store(false, Ordering::Release);
        self.flags.paused.store(false, Ordering::Release);

        let worker = Worker {
            parts: self.parts.clone(),
            clock: self.clock.clone(),
            flags: self.flags.clone(),
            events: self.events_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name("pipeline".into())
            .stack_size(8 * 1024)
            .spawn(move || worker.run(source))
            .map_err(|_| HardwareError::Audio("pipeline thread"))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if !self.running() {
            return Err(HardwareError::InvalidState("pause while not running"));
        }
        self.flags.paused.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if !self.flags.paused.swap(false, Ordering::AcqRel) {
            return Err(HardwareError::InvalidState("resume while not paused"));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        self.flags.stop.store(true, Ordering::Release);
        self.flags.paused.store(false, Ordering::Release);
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("pipeline worker panicked");
            }
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.running() {
            return Err(HardwareError::InvalidState("terminate while running"));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        if self.running() {
            return Err(HardwareError::InvalidState("reset while running"));
        }
        while self.events_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn set_uri(&mut self, tag: &'static str, uri: &str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.find(Element::HttpReader) != Some(tag) {
            return Err(HardwareError::Config("uri on a non-http element"));
        }
        self.uri = Some(uri.to_owned());
        Ok(())
    }

    fn set_i2s_clock(&mut self, info: MusicInfo) -> Result<(), HardwareError> {
        self.alive()?;
        if self.lease.is_none() {
            return Err(HardwareError::InvalidState("no i2s element"));
        }
        *lock(&self.clock) = info;
        Ok(())
    }

    fn listen(&mut self, timeout: Duration) -> Result<Option<PipelineEvent>, HardwareError> {
        self.alive()?;
        if !self.listening {
            thread::sleep(timeout);
            return Ok(None);
        }
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HardwareError::InvalidState("listener gone")),
        }
    }

    fn remove_listener(&mut self) -> Result<(), HardwareError> {
        self.alive()?;
        self.listening = false;
        Ok(())
    }

    fn unregister(&mut self, tag: &'static str) -> Result<(), HardwareError> {
        self.alive()?;
        if self.running() {
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
        if self.running() {
            return Err(HardwareError::InvalidState("deinit while running"));
        }
        self.elements.clear();
        self.lease = None;
        self.released = true;
        Ok(())
    }
}

impl Drop for EspPipeline {
    fn drop(&mut self) {
        if self.running() {
            log::warn!("pipeline dropped while running");
            self.flags.stop.store(true, Ordering::Release);
            let _ = self.wait_for_stop();
        }
    }
}
