//! Source selection.
//!
//! The arbiter owns the three backends and makes sure that at most one of
//! them holds the audio output at a time. Every call to [`PlayerArbiter::step`]
//! either performs one switch (stop the old source, then start the new one)
//! or runs the active source once.

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::backend::{Backend, BackendError, PlayerState};
use crate::config::{BoomboxConfig, ConfigStore};
use crate::protocol::{GuiRequest, Mode, StatusSnapshot};

#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("{} backend failed to start: {source}", .mode.label())]
    Init {
        mode: Mode,
        #[source]
        source: BackendError,
    },
    #[error("{} backend placed in the {} slot", .found.label(), .expected.label())]
    WrongSlot { expected: Mode, found: Mode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<Mode>,
    pub to: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepReport {
    pub transition: Option<Transition>,
    pub status: Option<StatusSnapshot>,
}

struct Slot {
    backend: Box<dyn Backend>,
    state: PlayerState,
}

pub struct PlayerArbiter<S: ConfigStore> {
    slots: [Slot; 3],
    current_source: Mode,
    config: BoomboxConfig,
    store: S,
    last_request: Option<GuiRequest>,
}

impl<S: ConfigStore> PlayerArbiter<S> {
    /// Load the persisted configuration and select its source. Nothing is
    /// started until the first [`step`](Self::step).
    pub fn new(
        air: Box<dyn Backend>,
        bt: Box<dyn Backend>,
        web: Box<dyn Backend>,
        mut store: S,
    ) -> Result<Self, ArbiterError> {
        for (expected, backend) in [(Mode::Air, &air), (Mode::Bt, &bt), (Mode::Web, &web)] {
            let found = backend.mode();
            if found != expected {
                return Err(ArbiterError::WrongSlot { expected, found });
            }
        }

        let config = BoomboxConfig::load_or_default(&mut store);
        info!("boombox: start-up source {}", config.mode.label());

        let slot = |backend| Slot {
            backend,
            state: PlayerState::Inactive,
        };
        Ok(Self {
            slots: [slot(air), slot(bt), slot(web)],
            current_source: config.mode,
            config,
            store,
            last_request: None,
        })
    }

    pub fn current_source(&self) -> Mode {
        self.current_source
    }

    pub fn state(&self, mode: Mode) -> PlayerState {
        self.slots[mode as usize].state
    }

    /// The backend currently holding the audio output.
    pub fn active(&self) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|&m| self.state(m) == PlayerState::Active)
    }

    pub fn config(&self) -> &BoomboxConfig {
        &self.config
    }

    pub fn last_request(&self) -> Option<&GuiRequest> {
        self.last_request.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One arbitration iteration.
    ///
    /// A request without its `state` flag is ignored. A request naming another
    /// source switches to it; the control it carries, if any, is not applied.
    /// Otherwise the active source runs once with the decoded control.
    pub fn step(&mut self, request: Option<GuiRequest>) -> Result<StepReport, ArbiterError> {
        let mut command = None;
        if let Some(req) = request {
            if req.state {
                self.current_source = req.mode;
                match req.command() {
                    Ok(cmd) => command = cmd,
                    Err(err) => warn!("boombox: {err}, control ignored"),
                }
                self.last_request = Some(req);
            } else {
                debug!("boombox: request without state flag ignored");
            }
        }

        let target = self.current_source;
        let active = self.active();

        let report = if active == Some(target) {
            let slot = &mut self.slots[target as usize];
            let status = slot.backend.run(command, &mut self.config);
            StepReport {
                transition: None,
                status,
            }
        } else {
            if let Some(cmd) = command {
                debug!("boombox: {cmd:?} dropped while switching to {}", target.label());
            }
            if let Some(old) = active {
                self.stop(old, target);
            }
            self.start(target)?;
            StepReport {
                transition: Some(Transition {
                    from: active,
                    to: target,
                }),
                status: None,
            }
        };

        debug_assert!(
            self.slots
                .iter()
                .filter(|s| s.state == PlayerState::Active)
                .count()
                <= 1
        );
        Ok(report)
    }

    /// Stop whatever is active. The configuration is saved when AIR was
    /// playing, keeping it as the start-up source.
    pub fn shutdown(&mut self) {
        if let Some(active) = self.active() {
            self.stop(active, active);
        }
    }

    fn stop(&mut self, old: Mode, next: Mode) {
        if old == Mode::Air {
            self.config.mode = next;
            if let Err(err) = self.config.save_to(&mut self.store) {
                error!("boombox: saving config failed: {err}");
            }
        }
        info!("boombox: stopping {}", old.label());
        let slot = &mut self.slots[old as usize];
        slot.backend.deinit();
        slot.state = PlayerState::Inactive;
    }

    fn start(&mut self, target: Mode) -> Result<(), ArbiterError> {
        if target == Mode::Air {
            match BoomboxConfig::load_from(&mut self.store) {
                Ok(Some(stored)) => self.config = stored,
                Ok(None) => debug!("boombox: no stored config, keeping current"),
                Err(err) => warn!("boombox: reloading config failed: {err}"),
            }
        }
        self.config.mode = target;

        info!("boombox: switch to {}", target.label());
        let slot = &mut self.slots[target as usize];
        match slot.backend.init(&self.config) {
            Ok(()) => {
                slot.state = PlayerState::Active;
                Ok(())
            }
            Err(source) => {
                error!("boombox: {} init failed: {source}", target.label());
                slot.backend.deinit();
                slot.state = PlayerState::Inactive;
                Err(ArbiterError::Init {
                    mode: target,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::{MemoryStore, StoreError};
    use crate::protocol::{AirStatus, Command, ControlTag, TrackInfo, WebStatus};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Save { frequency: u16 },
        Init { mode: Mode, frequency: u16 },
        Run { mode: Mode, command: Option<Command> },
        Deinit(Mode),
        DeinitNoop(Mode),
    }

    type Journal = Arc<Mutex<Vec<Event>>>;

    fn events(journal: &Journal) -> Vec<Event> {
        journal.lock().unwrap().clone()
    }

    struct MockBackend {
        mode: Mode,
        journal: Journal,
        initialized: bool,
        fail_init: bool,
    }

    impl Backend for MockBackend {
        fn mode(&self) -> Mode {
            self.mode
        }

        fn init(&mut self, config: &BoomboxConfig) -> Result<(), BackendError> {
            if self.initialized {
                self.deinit();
            }
            self.journal.lock().unwrap().push(Event::Init {
                mode: self.mode,
                frequency: config.air.frequency,
            });
            if self.fail_init {
                return Err(BackendError::Peripheral("controller".into()));
            }
            self.initialized = true;
            Ok(())
        }

        fn run(
            &mut self,
            command: Option<Command>,
            config: &mut BoomboxConfig,
        ) -> Option<StatusSnapshot> {
            self.journal.lock().unwrap().push(Event::Run {
                mode: self.mode,
                command,
            });
            if let Some(Command::SetFrequency(f)) = command {
                config.air.frequency = f;
            }
            Some(match self.mode {
                Mode::Air => StatusSnapshot::air(AirStatus {
                    frequency: config.air.frequency,
                    ..Default::default()
                }),
                Mode::Bt => StatusSnapshot::bluetooth(TrackInfo::default()),
                Mode::Web => StatusSnapshot::web(WebStatus::default()),
            })
        }

        fn deinit(&mut self) {
            let event = if self.initialized {
                Event::Deinit(self.mode)
            } else {
                Event::DeinitNoop(self.mode)
            };
            self.journal.lock().unwrap().push(event);
            self.initialized = false;
        }

        fn is_initialized(&self) -> bool {
            self.initialized
        }
    }

    struct JournalStore {
        inner: MemoryStore,
        journal: Journal,
    }

    impl ConfigStore for JournalStore {
        fn load_blob(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
            self.inner.load_blob(buf)
        }

        fn save_blob(&mut self, data: &[u8]) -> Result<(), StoreError> {
            let frequency = BoomboxConfig::decode(data)
                .map(|c| c.air.frequency)
                .unwrap_or_default();
            self.journal.lock().unwrap().push(Event::Save { frequency });
            self.inner.save_blob(data)
        }
    }

    fn mock(mode: Mode, journal: &Journal) -> Box<dyn Backend> {
        Box::new(MockBackend {
            mode,
            journal: journal.clone(),
            initialized: false,
            fail_init: false,
        })
    }

    fn arbiter_with(stored: Option<BoomboxConfig>) -> (PlayerArbiter<JournalStore>, Journal) {
        let journal = Journal::default();
        let inner = match stored {
            Some(cfg) => MemoryStore::with_blob(&cfg.encode()),
            None => MemoryStore::new(),
        };
        let store = JournalStore {
            inner,
            journal: journal.clone(),
        };
        let arbiter = PlayerArbiter::new(
            mock(Mode::Air, &journal),
            mock(Mode::Bt, &journal),
            mock(Mode::Web, &journal),
            store,
        )
        .unwrap();
        (arbiter, journal)
    }

    fn tuned_to(frequency: u16) -> BoomboxConfig {
        let mut cfg = BoomboxConfig::default();
        cfg.air.frequency = frequency;
        cfg
    }

    #[test]
    fn first_step_starts_persisted_source() {
        let mut stored = BoomboxConfig::default();
        stored.mode = Mode::Web;
        let (mut arbiter, journal) = arbiter_with(Some(stored));
        assert_eq!(arbiter.current_source(), Mode::Web);
        assert_eq!(arbiter.active(), None);

        let report = arbiter.step(None).unwrap();
        assert_eq!(
            report.transition,
            Some(Transition {
                from: None,
                to: Mode::Web
            })
        );
        assert_eq!(report.status, None);
        assert_eq!(arbiter.state(Mode::Web), PlayerState::Active);
        assert_eq!(
            events(&journal),
            vec![Event::Init {
                mode: Mode::Web,
                frequency: 10030
            }]
        );
    }

    #[test]
    fn switch_from_air_saves_before_deinit_and_reloads_on_return() {
        let (mut arbiter, journal) = arbiter_with(Some(tuned_to(10490)));
        arbiter.step(None).unwrap();
        assert_eq!(arbiter.active(), Some(Mode::Air));
        journal.lock().unwrap().clear();

        let report = arbiter.step(Some(GuiRequest::select(Mode::Bt))).unwrap();
        assert_eq!(
            report.transition,
            Some(Transition {
                from: Some(Mode::Air),
                to: Mode::Bt
            })
        );
        assert_eq!(
            events(&journal),
            vec![
                Event::Save { frequency: 10490 },
                Event::Deinit(Mode::Air),
                Event::Init {
                    mode: Mode::Bt,
                    frequency: 10490
                },
            ]
        );
        assert_eq!(arbiter.state(Mode::Air), PlayerState::Inactive);
        assert_eq!(arbiter.state(Mode::Bt), PlayerState::Active);

        let report = arbiter.step(None).unwrap();
        assert_eq!(report.transition, None);
        assert_eq!(report.status.map(|s| s.mode), Some(Mode::Bt));

        // in-memory tuning drifts while BT plays, the stored one must win
        arbiter
            .step(Some(GuiRequest::control(
                Mode::Bt,
                ControlTag::SetFrequency,
                9000,
            )))
            .unwrap();
        assert_eq!(arbiter.config().air.frequency, 9000);

        journal.lock().unwrap().clear();
        arbiter.step(Some(GuiRequest::select(Mode::Air))).unwrap();
        assert_eq!(
            events(&journal),
            vec![
                Event::Deinit(Mode::Bt),
                Event::Init {
                    mode: Mode::Air,
                    frequency: 10490
                },
            ]
        );
        assert_eq!(arbiter.config().air.frequency, 10490);
        assert_eq!(arbiter.config().mode, Mode::Air);
    }

    #[test]
    fn at_most_one_backend_active_for_any_sequence() {
        let (mut arbiter, journal) = arbiter_with(None);
        let sequence = [
            Mode::Air,
            Mode::Bt,
            Mode::Bt,
            Mode::Web,
            Mode::Air,
            Mode::Air,
            Mode::Web,
            Mode::Bt,
            Mode::Air,
            Mode::Web,
        ];
        for mode in sequence {
            arbiter.step(Some(GuiRequest::select(mode))).unwrap();
            let active: Vec<_> = Mode::ALL
                .into_iter()
                .filter(|&m| arbiter.state(m) == PlayerState::Active)
                .collect();
            assert_eq!(active, vec![mode]);
            arbiter.step(None).unwrap();
        }

        // replay the journal: an init never happens while another source is up
        let mut owner: Option<Mode> = None;
        for event in events(&journal) {
            match event {
                Event::Init { mode, .. } => {
                    assert_eq!(owner, None, "{mode:?} started while {owner:?} active");
                    owner = Some(mode);
                }
                Event::Deinit(mode) => {
                    assert_eq!(owner, Some(mode));
                    owner = None;
                }
                Event::Run { mode, .. } => assert_eq!(owner, Some(mode)),
                Event::Save { .. } => assert_eq!(owner, Some(Mode::Air)),
                Event::DeinitNoop(_) => {}
            }
        }
    }

    #[test]
    fn only_leaving_air_persists() {
        let (mut arbiter, journal) = arbiter_with(None);
        for mode in [Mode::Air, Mode::Web, Mode::Bt, Mode::Web, Mode::Air, Mode::Bt] {
            arbiter.step(Some(GuiRequest::select(mode))).unwrap();
        }
        let saves = events(&journal)
            .iter()
            .filter(|e| matches!(e, Event::Save { .. }))
            .count();
        assert_eq!(saves, 2);
        assert_eq!(arbiter.store().inner.save_count(), 2);
    }

    #[test]
    fn same_source_request_runs_with_its_command() {
        let (mut arbiter, journal) = arbiter_with(None);
        arbiter.step(None).unwrap();
        journal.lock().unwrap().clear();

        let req = GuiRequest::control(Mode::Air, ControlTag::SliderVolume, 40);
        let report = arbiter.step(Some(req)).unwrap();
        assert_eq!(report.transition, None);
        assert!(report.status.is_some());
        assert_eq!(
            events(&journal),
            vec![Event::Run {
                mode: Mode::Air,
                command: Some(Command::Volume(40))
            }]
        );
        assert_eq!(arbiter.last_request(), Some(&req));
    }

    #[test]
    fn control_on_switching_request_is_not_applied() {
        let (mut arbiter, journal) = arbiter_with(None);
        arbiter.step(None).unwrap();
        journal.lock().unwrap().clear();

        let req = GuiRequest::play(Mode::Web, crate::protocol::PlayControl::Next);
        arbiter.step(Some(req)).unwrap();
        assert!(!events(&journal)
            .iter()
            .any(|e| matches!(e, Event::Run { .. })));
        assert_eq!(arbiter.active(), Some(Mode::Web));
    }

    #[test]
    fn request_without_state_flag_is_ignored() {
        let (mut arbiter, journal) = arbiter_with(None);
        arbiter.step(None).unwrap();
        journal.lock().unwrap().clear();

        let mut req = GuiRequest::select(Mode::Bt);
        req.state = false;
        let report = arbiter.step(Some(req)).unwrap();
        assert_eq!(report.transition, None);
        assert_eq!(arbiter.current_source(), Mode::Air);
        assert_eq!(arbiter.last_request(), None);
        assert_eq!(
            events(&journal),
            vec![Event::Run {
                mode: Mode::Air,
                command: None
            }]
        );
    }

    #[test]
    fn out_of_range_control_runs_without_command() {
        let (mut arbiter, journal) = arbiter_with(None);
        arbiter.step(None).unwrap();
        journal.lock().unwrap().clear();

        arbiter
            .step(Some(GuiRequest::control(
                Mode::Air,
                ControlTag::SliderVolume,
                250,
            )))
            .unwrap();
        assert_eq!(
            events(&journal),
            vec![Event::Run {
                mode: Mode::Air,
                command: None
            }]
        );
    }

    #[test]
    fn failed_init_leaves_slot_inactive() {
        let journal = Journal::default();
        let bt = Box::new(MockBackend {
            mode: Mode::Bt,
            journal: journal.clone(),
            initialized: false,
            fail_init: true,
        });
        let mut arbiter = PlayerArbiter::new(
            mock(Mode::Air, &journal),
            bt,
            mock(Mode::Web, &journal),
            MemoryStore::new(),
        )
        .unwrap();
        arbiter.step(None).unwrap();

        let err = arbiter.step(Some(GuiRequest::select(Mode::Bt))).unwrap_err();
        assert!(matches!(err, ArbiterError::Init { mode: Mode::Bt, .. }));
        assert_eq!(arbiter.active(), None);
        assert_eq!(events(&journal).last(), Some(&Event::DeinitNoop(Mode::Bt)));
    }

    #[test]
    fn shutdown_saves_air_and_keeps_it_as_start_source() {
        let (mut arbiter, journal) = arbiter_with(Some(tuned_to(9470)));
        arbiter.step(None).unwrap();
        arbiter.shutdown();

        assert_eq!(arbiter.active(), None);
        let tail: Vec<_> = events(&journal).into_iter().skip(1).collect();
        assert_eq!(
            tail,
            vec![Event::Save { frequency: 9470 }, Event::Deinit(Mode::Air)]
        );
        let mut store = MemoryStore::with_blob(arbiter.store().inner.blob().unwrap());
        let saved = BoomboxConfig::load_from(&mut store).unwrap().unwrap();
        assert_eq!(saved.mode, Mode::Air);

        // nothing left to stop
        arbiter.shutdown();
        assert_eq!(events(&journal).len(), 3);
    }

    #[test]
    fn rejects_backend_in_wrong_slot() {
        let journal = Journal::default();
        let result = PlayerArbiter::new(
            mock(Mode::Bt, &journal),
            mock(Mode::Bt, &journal),
            mock(Mode::Web, &journal),
            MemoryStore::new(),
        );
        assert!(matches!(
            result,
            Err(ArbiterError::WrongSlot {
                expected: Mode::Air,
                found: Mode::Bt
            })
        ));
    }
}
