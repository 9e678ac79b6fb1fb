//! Bluetooth speaker: A2DP sink into the I2S output, AVRCP for the remote keys.

use std::sync::Arc;

use boombox_core::{
    truncated, Backend, BackendError, BoomboxConfig, Command, Mode, PlayControl, StatusSnapshot,
    TrackInfo,
};
use hardware::{
    AudioPipeline, Bluetooth, Element, ElementStatus, EventKind, Passthrough, PipelineEvent,
    PipelineFactory,
};
use log::{debug, info, trace, warn};

use super::{start_pipeline, teardown, POLL};

const CHAIN: [(Element, &str); 2] = [(Element::A2dpReader, "bt"), (Element::I2sWriter, "i2s")];
const TAGS: [&str; 2] = ["bt", "i2s"];

pub struct BtPlayer {
    bt: Box<dyn Bluetooth>,
    pipelines: Arc<dyn PipelineFactory>,
    name: String,
    pipeline: Option<Box<dyn AudioPipeline>>,
    track: TrackInfo,
    /// Last state handed to the GUI, `None` right after init.
    last: Option<TrackInfo>,
}

impl BtPlayer {
    pub fn new(bt: Box<dyn Bluetooth>, pipelines: Arc<dyn PipelineFactory>, name: &str) -> Self {
        Self {
            bt,
            pipelines,
            name: name.to_owned(),
            pipeline: None,
            track: TrackInfo::default(),
            last: None,
        }
    }

    fn passthrough(control: PlayControl) -> Option<Passthrough> {
        match control {
            PlayControl::Play => Some(Passthrough::Play),
            PlayControl::Pause => Some(Passthrough::Pause),
            PlayControl::Stop => Some(Passthrough::Stop),
            PlayControl::Next => Some(Passthrough::Forward),
            PlayControl::Previous => Some(Passthrough::Backward),
            PlayControl::Select(_) => None,
        }
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event.kind {
            EventKind::MusicInfo(info) if event.source == "bt" => {
                info!(
                    "bt: stream {} Hz, {} bits, {} ch",
                    info.sample_rate, info.bits, info.channels
                );
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if let Err(err) = pipeline.set_i2s_clock(info) {
                        warn!("bt: i2s clock: {err}");
                    }
                }
            }
            EventKind::Track(meta) => {
                self.track.title = truncated(&meta.title);
                self.track.artist = truncated(&meta.artist);
                self.track.album = truncated(&meta.album);
            }
            EventKind::Status(ElementStatus::Error) => {
                warn!("bt: {} reports an error", event.source)
            }
            other => trace!("bt: {} event {other:?}", event.source),
        }
    }
}

impl Backend for BtPlayer {
    fn mode(&self) -> Mode {
        Mode::Bt
    }

    fn init(&mut self, _config: &BoomboxConfig) -> Result<(), BackendError> {
        if self.is_initialized() {
            self.deinit();
        }
        info!("bt: init as {}", self.name);

        self.bt
            .enable(&self.name)
            .map_err(|err| BackendError::Peripheral(err.to_string()))?;

        match start_pipeline("bt", self.pipelines.as_ref(), &CHAIN, |_| Ok(())) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => {
                self.bt.disable();
                return Err(err);
            }
        }
        self.track = TrackInfo::default();
        self.last = None;
        Ok(())
    }

    fn run(&mut self, command: Option<Command>, _config: &mut BoomboxConfig) -> Option<StatusSnapshot> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            warn!("bt: run while not initialised");
            return None;
        };

        match pipeline.listen(POLL) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => {}
            Err(err) => debug!("bt: listen: {err}"),
        }

        match command {
            Some(Command::Play(control)) => match Self::passthrough(control) {
                Some(key) => {
                    if let Err(err) = self.bt.send_passthrough(key) {
                        warn!("bt: {key:?} failed: {err}");
                    }
                }
                None => debug!("bt: {control:?} has no meaning here"),
            },
            Some(other) => debug!("bt: {other:?} has no meaning here"),
            None => {}
        }

        let connected = self.bt.is_connected();
        if !connected && self.track.connected {
            // the old track belongs to the phone that left
            self.track = TrackInfo::default();
        }
        self.track.connected = connected;

        if command.is_none() && self.last.as_ref() == Some(&self.track) {
            return None;
        }
        self.last = Some(self.track.clone());
        Some(StatusSnapshot::bluetooth(self.track.clone()))
    }

    fn deinit(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            warn!("bt: deinit while not initialised");
            return;
        };
        teardown("bt", pipeline, &TAGS);
        self.bt.disable();
        self.last = None;
        info!("bt: released");
    }

    fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use boombox_core::{GuiRequest, StatusDetail};
    use hardware::sim::{SimBluetooth, SimPipelineFactory};
    use hardware::{MusicInfo, TrackMeta};

    use super::*;

    struct Rig {
        bt: SimBluetooth,
        pipelines: SimPipelineFactory,
        player: BtPlayer,
        config: BoomboxConfig,
    }

    fn rig() -> Rig {
        let bt = SimBluetooth::new();
        let pipelines = SimPipelineFactory::new();
        let player = BtPlayer::new(Box::new(bt.clone()), Arc::new(pipelines.clone()), "BOOMBOX");
        Rig {
            bt,
            pipelines,
            player,
            config: BoomboxConfig::default(),
        }
    }

    fn track(status: Option<StatusSnapshot>) -> TrackInfo {
        match status {
            Some(StatusSnapshot {
                detail: StatusDetail::Bluetooth(track),
                ..
            }) => track,
            other => panic!("expected BT status, got {other:?}"),
        }
    }

    #[test]
    fn init_twice_rebuilds_once() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.player.init(&rig.config).unwrap();

        assert!(rig.player.is_initialized());
        assert_eq!(rig.pipelines.live_pipelines(), 1);
        assert_eq!(rig.bt.enable_count(), 2);
        assert!(rig.bt.enabled());
        assert!(rig.pipelines.i2s_claimed());
    }

    #[test]
    fn init_enables_controller_and_reclocks_on_stream_info() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        assert!(rig.bt.enabled());
        assert_eq!(rig.bt.device_name().as_deref(), Some("BOOMBOX"));
        assert!(rig.pipelines.i2s_claimed());

        // first run drains the A2DP stream info
        let status = track(rig.player.run(None, &mut rig.config));
        assert!(!status.connected);
        assert_eq!(
            rig.pipelines.i2s_clock(),
            Some(MusicInfo {
                sample_rate: 44_100,
                bits: 16,
                channels: 2
            })
        );
        assert_eq!(rig.player.run(None, &mut rig.config), None);
    }

    #[test]
    fn track_metadata_and_connection_are_reported() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.player.run(None, &mut rig.config);

        rig.bt.set_connected(true);
        assert!(track(rig.player.run(None, &mut rig.config)).connected);

        rig.pipelines.inject(PipelineEvent {
            source: "bt",
            kind: EventKind::Track(TrackMeta {
                title: truncated("Song 2"),
                artist: truncated("Blur"),
                album: truncated("Blur"),
            }),
        });
        let status = track(rig.player.run(None, &mut rig.config));
        assert_eq!(status.title.as_str(), "Song 2");
        assert_eq!(status.artist.as_str(), "Blur");

        rig.bt.set_connected(false);
        let status = track(rig.player.run(None, &mut rig.config));
        assert!(!status.connected);
        assert!(status.title.is_empty());
    }

    #[test]
    fn play_controls_become_passthrough_keys() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.bt.set_connected(true);

        for control in [PlayControl::Play, PlayControl::Next, PlayControl::Previous, PlayControl::Select(2)] {
            let command = GuiRequest::play(Mode::Bt, control).command().unwrap();
            assert!(rig.player.run(command, &mut rig.config).is_some());
        }
        assert_eq!(
            rig.bt.sent(),
            vec![Passthrough::Play, Passthrough::Forward, Passthrough::Backward]
        );
    }

    #[test]
    fn passthrough_without_phone_is_only_logged() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        let command = GuiRequest::play(Mode::Bt, PlayControl::Pause).command().unwrap();
        assert!(rig.player.run(command, &mut rig.config).is_some());
        assert!(rig.bt.sent().is_empty());
    }

    #[test]
    fn deinit_disables_controller_once() {
        let mut rig = rig();
        rig.player.init(&rig.config).unwrap();
        rig.player.deinit();
        assert!(!rig.bt.enabled());
        assert!(!rig.pipelines.i2s_claimed());
        assert_eq!(rig.pipelines.live_pipelines(), 0);

        rig.player.deinit();
        rig.player.init(&rig.config).unwrap();
        assert_eq!(rig.bt.enable_count(), 2);
    }

    #[test]
    fn busy_output_leaves_controller_off() {
        let mut rig = rig();
        let mut other = hardware::PipelineFactory::create(&rig.pipelines).unwrap();
        other.register(Element::I2sWriter, "i2s").unwrap();

        assert!(matches!(
            rig.player.init(&rig.config),
            Err(BackendError::Pipeline(_))
        ));
        assert!(!rig.bt.enabled());
        other.deinit().unwrap();
    }
}
