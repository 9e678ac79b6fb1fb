//! Web radio: HTTP stream through the MP3 decoder into the I2S output.

use std::sync::Arc;
use std::time::Duration;

use boombox_core::{
    truncated, Backend, BackendError, BoomboxConfig, Command, Mode, PlayControl, Playlist,
    StatusSnapshot, Text, WebStatus,
};
use hardware::{
    free_heap_bytes, AudioPipeline, Element, ElementStatus, EventKind, HardwareError,
    PipelineEvent, PipelineFactory, WifiLink,
};
use log::{debug, info, trace, warn};

use super::{pipeline_err, start_pipeline, teardown};

const CHAIN: [(Element, &str); 3] = [
    (Element::HttpReader, "http"),
    (Element::Mp3Decoder, "mp3"),
    (Element::I2sWriter, "i2s"),
];
const TAGS: [&str; 3] = ["http", "mp3", "i2s"];

const WIFI_TIMEOUT: Duration = Duration::from_secs(15);
/// Streams deliver events slowly, give each run a chance to see one.
const LISTEN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Default)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Playing,
    Paused,
    Stopped,
}

pub struct HttpPlayer {
    wifi: Box<dyn WifiLink>,
    pipelines: Arc<dyn PipelineFactory>,
    playlist: Playlist,
    credentials: WifiCredentials,
    pipeline: Option<Box<dyn AudioPipeline>>,
    /// Playlist index, kept across sessions.
    station: usize,
    transport: Transport,
    /// Stream title from the metadata, empty until the station sends one.
    title: Text,
    last: Option<WebStatus>,
}

impl HttpPlayer {
    pub fn new(
        wifi: Box<dyn WifiLink>,
        pipelines: Arc<dyn PipelineFactory>,
        playlist: Playlist,
        credentials: WifiCredentials,
    ) -> Self {
        Self {
            wifi,
            pipelines,
            playlist,
            credentials,
            pipeline: None,
            station: 0,
            transport: Transport::Stopped,
            title: Text::new(),
            last: None,
        }
    }

    fn current_url(&self) -> Result<&str, BackendError> {
        self.playlist
            .url(self.station)
            .ok_or_else(|| BackendError::Config(format!("no playlist entry {}", self.station)))
    }

    /// Point the running pipeline at the current station and start over.
    fn restart(&mut self) -> Result<(), HardwareError> {
        let Some(url) = self.playlist.url(self.station) else {
            return Err(HardwareError::Config("station outside playlist"));
        };
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Err(HardwareError::InvalidState("pipeline not started"));
        };
        info!("web: station {} {url}", self.station);

        pipeline.stop()?;
        pipeline.wait_for_stop()?;
        pipeline.terminate()?;
        pipeline.reset()?;
        pipeline.set_uri("http", url)?;
        pipeline.run()?;
        self.transport = Transport::Playing;
        self.title.clear();
        Ok(())
    }

    fn select(&mut self, index: usize) -> Result<(), HardwareError> {
        if index >= self.playlist.count() {
            warn!("web: no station {index}, playlist has {}", self.playlist.count());
            return Ok(());
        }
        self.station = index;
        self.restart()
    }

    fn apply(&mut self, control: PlayControl) -> Result<(), HardwareError> {
        let count = self.playlist.count();
        match (control, self.transport) {
            (PlayControl::Play, Transport::Paused) => {
                self.pipeline_mut()?.resume()?;
                self.transport = Transport::Playing;
            }
            (PlayControl::Play, Transport::Stopped) => self.restart()?,
            (PlayControl::Pause, Transport::Playing) => {
                self.pipeline_mut()?.pause()?;
                self.transport = Transport::Paused;
            }
            (PlayControl::Stop, Transport::Playing | Transport::Paused) => {
                let pipeline = self.pipeline_mut()?;
                pipeline.stop()?;
                pipeline.wait_for_stop()?;
                self.transport = Transport::Stopped;
            }
            (PlayControl::Next, _) => self.select((self.station + 1) % count.max(1))?,
            (PlayControl::Previous, _) => {
                self.select((self.station + count.max(1) - 1) % count.max(1))?
            }
            (PlayControl::Select(index), _) => self.select(usize::from(index))?,
            (control, transport) => debug!("web: {control:?} while {transport:?}"),
        }
        Ok(())
    }

    fn pipeline_mut(&mut self) -> Result<&mut Box<dyn AudioPipeline>, HardwareError> {
        self.pipeline
            .as_mut()
            .ok_or(HardwareError::InvalidState("pipeline not started"))
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event.kind {
            EventKind::MusicInfo(info) if event.source == "mp3" => {
                info!(
                    "web: decoder reports {} Hz, {} bits, {} ch",
                    info.sample_rate, info.bits, info.channels
                );
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if let Err(err) = pipeline.set_i2s_clock(info) {
                        warn!("web: i2s clock: {err}");
                    }
                }
            }
            EventKind::Track(meta) => self.title = truncated(&meta.title),
            EventKind::Status(status @ (ElementStatus::Stopped | ElementStatus::Finished)) => {
                warn!("web: {} {status:?}", event.source);
                self.transport = Transport::Stopped;
            }
            EventKind::Status(ElementStatus::Error) => {
                warn!("web: {} reports an error, stream stopped", event.source);
                self.transport = Transport::Stopped;
            }
            other => trace!("web: {} event {other:?}", event.source),
        }
    }

    fn status(&self) -> WebStatus {
        let entry = self.playlist.get(self.station);
        WebStatus {
            station: entry.map(|e| truncated(&e.title)).unwrap_or_default(),
            uri: entry.map(|e| truncated(&e.url)).unwrap_or_default(),
            station_index: u16::try_from(self.station).unwrap_or(u16::MAX),
            title: self.title.clone(),
            playing: self.transport == Transport::Playing,
        }
    }
}

impl Backend for HttpPlayer {
    fn mode(&self) -> Mode {
        Mode::Web
    }

    fn init(&mut self, _config: &BoomboxConfig) -> Result<(), BackendError> {
        if self.is_initialized() {
            self.deinit();
        }
        info!("web: init, free heap {} bytes", free_heap_bytes());

        if self.playlist.is_empty() {
            return Err(BackendError::Config("playlist is empty".into()));
        }
        if self.station >= self.playlist.count() {
            self.station = 0;
        }
        let url = self.current_url()?.to_owned();

        self.wifi
            .connect(&self.credentials.ssid, &self.credentials.password, WIFI_TIMEOUT)
            .map_err(|err| BackendError::Network(err.to_string()))?;

        match start_pipeline("web", self.pipelines.as_ref(), &CHAIN, |p| {
            p.set_uri("http", &url)
        }) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => {
                self.wifi.disconnect();
                return Err(err);
            }
        }
        info!("web: playing {url}");
        self.transport = Transport::Playing;
        self.title.clear();
        self.last = None;
        Ok(())
    }

    fn run(&mut self, command: Option<Command>, _config: &mut BoomboxConfig) -> Option<StatusSnapshot> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            warn!("web: run while not initialised");
            return None;
        };

        match pipeline.listen(LISTEN) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => {}
            Err(err) => debug!("web: listen: {err}"),
        }

        match command {
            Some(Command::Play(control)) => {
                if let Err(err) = self.apply(control) {
                    warn!("web: {control:?} failed: {}", pipeline_err(err));
                    self.transport = Transport::Stopped;
                }
            }
            Some(other) => debug!("web: {other:?} has no meaning here"),
            None => {}
        }

        let status = self.status();
        if command.is_none() && self.last.as_ref() == Some(&status) {
            return None;
        }
        self.last = Some(status.clone());
        Some(StatusSnapshot::web(status))
    }

    fn deinit(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            warn!("web: deinit while not initialised");
            return;
        };
        teardown("web", pipeline, &TAGS);
        self.wifi.disconnect();
        self.transport = Transport::Stopped;
        self.last = None;
        info!("web: released, free heap {} bytes", free_heap_bytes());
    }

    fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }
}
