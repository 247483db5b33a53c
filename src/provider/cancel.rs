//! Epoch clock and the cancel signal handed to every unit of async work.
//!
//! The clock is written only by the owning session actor. Work carries the
//! epoch it was started under; it is stale as soon as the clock moves past
//! that epoch or the session closes.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochState {
    pub current: u64,
    pub closed: bool,
}

/// Single-writer epoch counter for one session.
#[derive(Debug)]
pub struct EpochClock {
    tx: watch::Sender<EpochState>,
}

impl EpochClock {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(EpochState::default());
        Self { tx }
    }

    pub fn current(&self) -> u64 {
        self.tx.borrow().current
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }

    /// Starts a new epoch, invalidating all work tagged with older ones.
    pub fn advance(&self) -> u64 {
        self.tx.send_modify(|state| state.current += 1);
        self.current()
    }

    /// Marks the session closed; every signal reports cancelled from now on.
    pub fn close(&self) {
        self.tx.send_modify(|state| state.closed = true);
    }

    /// Signal tagged with the current epoch.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            tag: Some(self.current()),
            rx: self.tx.subscribe(),
        }
    }

    /// Signal that only fires when the session closes.
    pub fn session_signal(&self) -> CancelSignal {
        CancelSignal {
            tag: None,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation: compares a tag against the session's epoch.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tag: Option<u64>,
    rx: watch::Receiver<EpochState>,
}

impl CancelSignal {
    /// Epoch this work belongs to, if it is epoch-scoped.
    pub fn epoch(&self) -> Option<u64> {
        self.tag
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_stale(&self.rx.borrow())
    }

    /// Resolves once the work is stale. A dropped clock counts as closed.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if self.is_stale(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_stale(&self, state: &EpochState) -> bool {
        state.closed || self.tag.is_some_and(|tag| tag != state.current)
    }
}
