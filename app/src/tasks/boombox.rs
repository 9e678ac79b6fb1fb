use std::sync::mpsc::Sender;
use std::thread;

use boombox_core::queue::{LOOP_DELAY, REQUEST_WAIT};
use boombox_core::{ConfigStore, GuiRequest, Inbox, Outbox, PlayerArbiter, PostError, StatusSnapshot};
use log::{debug, error, info};

use crate::tasks::task::{AppTask, TaskMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns the arbiter: takes GUI requests, drives the active source and
/// publishes its status.
pub struct BoomboxTask<S: ConfigStore + Send + 'static> {
    arbiter: PlayerArbiter<S>,
    requests: Inbox<GuiRequest>,
    status: Outbox<StatusSnapshot>,
    exit: Sender<()>,
}

impl<S: ConfigStore + Send + 'static> AppTask for BoomboxTask<S> {
    fn into_runner(mut self: Box<Self>) -> Box<dyn FnOnce() + Send + 'static> {
        Box::new(move || self.run())
    }

    fn meta(&self) -> TaskMeta {
        TaskMeta {
            name: "boombox",
            stack_bytes: Some(32 * 1024),
        }
    }
}

impl<S: ConfigStore + Send + 'static> BoomboxTask<S> {
    pub fn new(
        arbiter: PlayerArbiter<S>,
        requests: Inbox<GuiRequest>,
        status: Outbox<StatusSnapshot>,
        exit: Sender<()>,
    ) -> Self {
        Self {
            arbiter,
            requests,
            status,
            exit,
        }
    }

    fn run(&mut self) {
        info!("boombox: task started");
        while self.iterate() == Flow::Continue {
            thread::sleep(LOOP_DELAY);
        }
        self.arbiter.shutdown();
        let _ = self.exit.send(());
        info!("boombox: task finished");
    }

    /// One loop iteration without the trailing delay.
    pub fn iterate(&mut self) -> Flow {
        let request = match self.requests.recv_timeout(REQUEST_WAIT) {
            Ok(request) => request,
            Err(PostError::Closed) => {
                info!("boombox: {} closed", self.requests.name());
                return Flow::Exit;
            }
            Err(PostError::Full) => None,
        };
        if let Some(request) = &request {
            debug!("boombox: request {request:?}");
        }

        match self.arbiter.step(request) {
            Ok(report) => {
                if let Some(status) = report.status {
                    self.status.post_or_drop(status);
                }
                Flow::Continue
            }
            Err(err) => {
                error!("boombox: {err}");
                Flow::Exit
            }
        }
    }

    pub fn arbiter(&self) -> &PlayerArbiter<S> {
        &self.arbiter
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    use boombox_core::{
        queue, Backend, ControlTag, MemoryStore, Mode, PlayControl, Playlist, PlayerState,
        StatusDetail,
    };
    use hardware::sim::{SimBluetooth, SimPipelineFactory, SimTuner, SimWifi};

    use super::*;
    use crate::players::{AirPlayer, BtPlayer, HttpPlayer, WifiCredentials};

    struct Rig {
        task: BoomboxTask<MemoryStore>,
        gui: Outbox<GuiRequest>,
        status: Inbox<StatusSnapshot>,
        pipelines: SimPipelineFactory,
        bt: SimBluetooth,
        wifi: SimWifi,
    }

    fn rig(store: MemoryStore) -> Rig {
        let pipelines = SimPipelineFactory::new();
        let bt = SimBluetooth::new();
        let wifi = SimWifi::new();
        let shared: Arc<dyn hardware::PipelineFactory> = Arc::new(pipelines.clone());

        let air: Box<dyn Backend> = Box::new(AirPlayer::new(
            Box::new(SimTuner::new(SimTuner::default_stations())),
            shared.clone(),
        ));
        let bt_player: Box<dyn Backend> =
            Box::new(BtPlayer::new(Box::new(bt.clone()), shared.clone(), "BOOMBOX"));
        let web: Box<dyn Backend> = Box::new(HttpPlayer::new(
            Box::new(wifi.clone()),
            shared,
            Playlist::parse("Title1=Radio ROKS\nFile1=http://online.radioroks.ua/RadioROKS\n"),
            WifiCredentials {
                ssid: "home".into(),
                password: "secret".into(),
            },
        ));
        let arbiter = PlayerArbiter::new(air, bt_player, web, store).unwrap();

        let (gui, requests) = queue::gui_to_boombox();
        let (status_tx, status) = queue::boombox_to_gui();
        let (exit, _exit_rx) = channel();
        Rig {
            task: BoomboxTask::new(arbiter, requests, status_tx, exit),
            gui,
            status,
            pipelines,
            bt,
            wifi,
        }
    }

    fn send(rig: &mut Rig, mut request: GuiRequest) -> Flow {
        assert!(rig.gui.post_request(&mut request));
        rig.task.iterate()
    }

    #[test]
    fn starts_persisted_source_and_reports_status() {
        let mut rig = rig(MemoryStore::new());
        assert_eq!(rig.task.iterate(), Flow::Continue);
        assert_eq!(rig.task.arbiter().active(), Some(Mode::Air));

        assert_eq!(rig.task.iterate(), Flow::Continue);
        let status = rig.status.try_recv().unwrap().unwrap();
        assert_eq!(status.mode, Mode::Air);
        assert!(matches!(status.detail, StatusDetail::Air(_)));
    }

    #[test]
    fn switching_hands_the_output_over() {
        let mut rig = rig(MemoryStore::new());
        rig.task.iterate();

        send(&mut rig, GuiRequest::select(Mode::Bt));
        assert_eq!(rig.task.arbiter().active(), Some(Mode::Bt));
        assert_eq!(rig.task.arbiter().state(Mode::Air), PlayerState::Inactive);
        assert!(rig.bt.enabled());
        assert_eq!(rig.pipelines.live_pipelines(), 1);
        // leaving AIR stores BT as the next start-up source
        assert_eq!(rig.task.arbiter().store().save_count(), 1);

        send(&mut rig, GuiRequest::select(Mode::Web));
        assert!(!rig.bt.enabled());
        assert_eq!(rig.pipelines.live_pipelines(), 1);

        send(&mut rig, GuiRequest::play(Mode::Web, PlayControl::Pause));
        let last = rig.status.drain().last().unwrap();
        match last.detail {
            StatusDetail::Web(web) => assert!(!web.playing),
            other => panic!("expected web status, got {other:?}"),
        }
    }

    #[test]
    fn air_controls_flow_through() {
        let mut rig = rig(MemoryStore::new());
        rig.task.iterate();
        send(&mut rig, GuiRequest::control(Mode::Air, ControlTag::SetFrequency, 9470));
        assert_eq!(rig.task.arbiter().config().air.frequency, 9470);
    }

    #[test]
    fn closed_gui_mailbox_ends_the_task() {
        let Rig { mut task, gui, .. } = rig(MemoryStore::new());
        task.iterate();
        drop(gui);
        assert_eq!(task.iterate(), Flow::Exit);
    }

    #[test]
    fn failed_start_is_fatal() {
        let mut rig = rig(MemoryStore::new());
        rig.task.iterate();
        rig.wifi.set_reachable(false);

        assert_eq!(send(&mut rig, GuiRequest::select(Mode::Web)), Flow::Exit);
        assert_eq!(rig.task.arbiter().active(), None);
        assert_eq!(rig.pipelines.live_pipelines(), 0);
    }
}
