//! Bounded mailboxes between the GUI task and the Boombox task.
//!
//! Producers never block: a full mailbox drops the message and the caller
//! decides whether that deserves more than a warning.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::protocol::{GuiRequest, StatusSnapshot};

pub const GUI_TO_BOOMBOX_CAPACITY: usize = 2;
pub const BOOMBOX_TO_GUI_CAPACITY: usize = 10;

/// Longest the arbitration loop waits for a GUI request.
pub const REQUEST_WAIT: Duration = Duration::from_millis(100);
/// Pause at the end of every arbitration iteration.
pub const LOOP_DELAY: Duration = Duration::from_millis(200);
/// GUI refresh period.
pub const GUI_TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

pub struct Outbox<T> {
    name: &'static str,
    tx: SyncSender<T>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

pub struct Inbox<T> {
    name: &'static str,
    rx: Receiver<T>,
}

pub fn mailbox<T>(name: &'static str, capacity: usize) -> (Outbox<T>, Inbox<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (Outbox { name, tx }, Inbox { name, rx })
}

pub fn gui_to_boombox() -> (Outbox<GuiRequest>, Inbox<GuiRequest>) {
    mailbox("gui->boombox", GUI_TO_BOOMBOX_CAPACITY)
}

pub fn boombox_to_gui() -> (Outbox<StatusSnapshot>, Inbox<StatusSnapshot>) {
    mailbox("boombox->gui", BOOMBOX_TO_GUI_CAPACITY)
}

impl<T> Outbox<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Non-blocking send.
    pub fn post(&self, msg: T) -> Result<(), PostError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => PostError::Full,
            TrySendError::Disconnected(_) => PostError::Closed,
        })
    }

    /// Send if there is room, otherwise drop the message with a warning.
    /// Returns whether the message was queued.
    pub fn post_or_drop(&self, msg: T) -> bool {
        match self.post(msg) {
            Ok(()) => true,
            Err(err) => {
                warn!("{}: dropped message ({err})", self.name);
                false
            }
        }
    }
}

impl Outbox<GuiRequest> {
    /// Queue a pending request and clear its dirty flag, whatever the outcome.
    pub fn post_request(&self, request: &mut GuiRequest) -> bool {
        if !request.state {
            return false;
        }
        let sent = self.post_or_drop(*request);
        request.state = false;
        sent
    }
}

impl<T> Inbox<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait up to `timeout` for one message. `Err(PostError::Closed)` once
    /// every sender is gone and the queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, PostError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PostError::Closed),
        }
    }

    pub fn try_recv(&self) -> Result<Option<T>, PostError> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PostError::Closed),
        }
    }

    /// Everything currently queued, oldest first.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::protocol::{AirStatus, Mode};

    #[test]
    fn full_mailbox_drops_without_blocking() {
        let (tx, rx) = boombox_to_gui();
        for _ in 0..BOOMBOX_TO_GUI_CAPACITY {
            assert!(tx.post_or_drop(StatusSnapshot::air(AirStatus::default())));
        }

        let started = Instant::now();
        assert_eq!(
            tx.post(StatusSnapshot::air(AirStatus::default())),
            Err(PostError::Full)
        );
        assert!(!tx.post_or_drop(StatusSnapshot::air(AirStatus::default())));
        assert!(started.elapsed() < Duration::from_millis(50));

        assert_eq!(rx.drain().count(), BOOMBOX_TO_GUI_CAPACITY);
    }

    #[test]
    fn request_flag_is_cleared_after_post() {
        let (tx, rx) = gui_to_boombox();
        let mut req = GuiRequest::select(Mode::Bt);

        assert!(tx.post_request(&mut req));
        assert!(!req.state);
        // nothing pending, nothing sent
        assert!(!tx.post_request(&mut req));

        let got = rx.try_recv().unwrap().unwrap();
        assert!(got.state);
        assert_eq!(got.mode, Mode::Bt);
        assert_eq!(rx.try_recv(), Ok(None));
    }

    #[test]
    fn request_flag_is_cleared_even_when_dropped() {
        let (tx, _rx) = gui_to_boombox();
        for _ in 0..GUI_TO_BOOMBOX_CAPACITY {
            let mut req = GuiRequest::select(Mode::Air);
            assert!(tx.post_request(&mut req));
        }
        let mut req = GuiRequest::select(Mode::Web);
        assert!(!tx.post_request(&mut req));
        assert!(!req.state);
    }

    #[test]
    fn closed_mailbox_reports_closed() {
        let (tx, rx) = gui_to_boombox();
        drop(tx);
        assert_eq!(rx.recv_timeout(REQUEST_WAIT), Err(PostError::Closed));

        let (tx, rx) = gui_to_boombox();
        drop(rx);
        assert_eq!(tx.post(GuiRequest::select(Mode::Air)), Err(PostError::Closed));
    }

    #[test]
    fn recv_timeout_returns_none_when_idle() {
        let (_tx, rx) = gui_to_boombox();
        assert_eq!(rx.recv_timeout(Duration::from_millis(5)), Ok(None));
    }
}
