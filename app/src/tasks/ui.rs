use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use boombox_core::queue::GUI_TICK;
use boombox_core::{GuiRequest, Inbox, Mode, Outbox, StatusDetail, StatusSnapshot};
use log::{debug, info, warn};

use crate::console::{self, ConsoleError, HELP};
use crate::tasks::task::{AppTask, TaskMeta};

/// Read stdin line by line on its own thread. The receiver disconnects at
/// end of input.
pub fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        warn!("ui: no console input: {err}");
    }
    rx
}

/// Console stand-in for the touch GUI.
pub struct UiTask {
    requests: Outbox<GuiRequest>,
    status: Inbox<StatusSnapshot>,
    lines: Receiver<String>,
    /// Source selected on the console.
    mode: Mode,
    /// Whether end of input ends the task, and with it the boombox.
    quit_on_eof: bool,
}

impl AppTask for UiTask {
    fn into_runner(mut self: Box<Self>) -> Box<dyn FnOnce() + Send + 'static> {
        Box::new(move || self.run())
    }

    fn meta(&self) -> TaskMeta {
        TaskMeta {
            name: "ui",
            stack_bytes: Some(8 * 1024),
        }
    }
}

impl UiTask {
    pub fn new(
        requests: Outbox<GuiRequest>,
        status: Inbox<StatusSnapshot>,
        lines: Receiver<String>,
        mode: Mode,
    ) -> Self {
        Self {
            requests,
            status,
            lines,
            mode,
            quit_on_eof: true,
        }
    }

    /// Keep relaying status after the console input is gone.
    pub fn stay_after_input_ends(mut self) -> Self {
        self.quit_on_eof = false;
        self
    }

    fn run(&mut self) {
        info!("ui: ready, `help` lists commands");
        while self.tick() {
            thread::sleep(GUI_TICK);
        }
        info!("ui: console closed");
    }

    /// Handle pending input and status. `false` once input has ended and
    /// the task should quit.
    pub fn tick(&mut self) -> bool {
        let open = loop {
            match self.lines.try_recv() {
                Ok(line) => self.handle_line(&line),
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        };

        for status in self.status.drain() {
            Self::show(&status);
        }
        open || !self.quit_on_eof
    }

    fn handle_line(&mut self, line: &str) {
        if line.trim().eq_ignore_ascii_case("help") {
            info!("ui: commands\n{HELP}");
            return;
        }
        match console::parse(line, self.mode) {
            Ok(mut request) => {
                if request.tag.is_none() {
                    self.mode = request.mode;
                }
                debug!("ui: {request:?}");
                self.requests.post_request(&mut request);
            }
            Err(ConsoleError::Empty) => {}
            Err(err) => warn!("ui: {err}"),
        }
    }

    /// Status is display only. The source the console addresses changes
    /// solely on a select typed by the user, so a snapshot queued before a
    /// switch cannot steer later controls back.
    fn show(status: &StatusSnapshot) {
        match &status.detail {
            StatusDetail::Air(air) => info!(
                "[{}] {} {} {} | SNR {} dB RSSI {} dBuV | {} | vol {} | BW {} step {} | #{} {}",
                status.mode.label(),
                air.band_label(),
                air.frequency_text(),
                air.frequency_unit(),
                air.snr,
                air.rssi,
                air.stereo_label(),
                air.volume,
                air.bandwidth,
                air.step,
                air.station_index,
                air.rds
            ),
            StatusDetail::Bluetooth(track) if !track.connected => {
                info!("[{}] waiting for a phone", status.mode.label())
            }
            StatusDetail::Bluetooth(track) => info!(
                "[{}] {} - {} ({})",
                status.mode.label(),
                track.artist,
                track.title,
                track.album
            ),
            StatusDetail::Web(web) => info!(
                "[{}] #{} {} {} | {}{}",
                status.mode.label(),
                web.station_index,
                web.station,
                web.uri,
                if web.playing { "playing" } else { "stopped" },
                if web.title.is_empty() {
                    String::new()
                } else {
                    format!(" | {}", web.title)
                }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use boombox_core::{queue, AirStatus, Command, ControlTag, TrackInfo};

    use super::*;

    struct Rig {
        ui: UiTask,
        input: mpsc::Sender<String>,
        requests: Inbox<GuiRequest>,
        status: Outbox<StatusSnapshot>,
    }

    fn rig() -> Rig {
        let (requests_tx, requests) = queue::gui_to_boombox();
        let (status, status_rx) = queue::boombox_to_gui();
        let (input, lines) = mpsc::channel();
        Rig {
            ui: UiTask::new(requests_tx, status_rx, lines, Mode::Air),
            input,
            requests,
            status,
        }
    }

    #[test]
    fn console_lines_become_requests() {
        let mut rig = rig();
        rig.input.send("vol 40".into()).unwrap();
        rig.input.send("nonsense".into()).unwrap();
        rig.input.send("bt".into()).unwrap();
        assert!(rig.ui.tick());

        let sent: Vec<_> = rig.requests.drain().collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].command(), Ok(Some(Command::Volume(40))));
        assert_eq!(sent[1], GuiRequest::select(Mode::Bt));

        // controls now address the selected source
        rig.input.send("next".into()).unwrap();
        rig.ui.tick();
        let next = rig.requests.try_recv().unwrap().unwrap();
        assert_eq!(next.mode, Mode::Bt);
        assert_eq!(next.tag, Some(ControlTag::PlayControl));
    }

    #[test]
    fn queued_status_does_not_steer_controls() {
        let mut rig = rig();
        rig.input.send("bt".into()).unwrap();
        assert!(rig.ui.tick());

        // AIR snapshot published before the boombox saw the switch
        rig.status.post(StatusSnapshot::air(AirStatus::default())).unwrap();
        rig.ui.tick();
        assert_eq!(rig.ui.mode, Mode::Bt);

        rig.input.send("vol 30".into()).unwrap();
        rig.ui.tick();
        let sent: Vec<_> = rig
            .requests
            .drain()
            .map(|request| (request.mode, request.tag))
            .collect();
        assert_eq!(
            sent,
            [(Mode::Bt, None), (Mode::Bt, Some(ControlTag::SliderVolume))]
        );
    }

    #[test]
    fn status_is_drained_every_tick() {
        let mut rig = rig();
        rig.status.post(StatusSnapshot::bluetooth(TrackInfo::default())).unwrap();
        rig.status.post(StatusSnapshot::air(AirStatus::default())).unwrap();
        assert!(rig.ui.tick());
        assert_eq!(rig.ui.status.try_recv(), Ok(None));
        assert_eq!(rig.ui.mode, Mode::Air);
    }

    #[test]
    fn end_of_input_stops_the_task() {
        let Rig { mut ui, input, .. } = rig();
        input.send("air".into()).unwrap();
        drop(input);
        assert!(!ui.tick());
    }

    #[test]
    fn device_console_outlives_its_input() {
        let Rig { ui, input, .. } = rig();
        let mut ui = ui.stay_after_input_ends();
        drop(input);
        assert!(ui.tick());
    }
}
