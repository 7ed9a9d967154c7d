use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::models::SessionState;

/// Ticket of the reconciliation started at construction.
pub(crate) const INITIAL_TICKET: u64 = 0;

/// Published when a transition is abandoned before anything was ever
/// committed, so the session never stays `Loading`.
const INTERRUPTED_MESSAGE: &str = "Session initialization was interrupted";

struct Ledger {
    next_ticket: u64,
    /// Tickets whose transition has neither committed nor been abandoned.
    live: BTreeSet<u64>,
    /// Last terminal state any transition settled on.
    committed: SessionState,
}

/// The observable session cell.
///
/// Each transition publishes `Loading` and holds a live ticket until it
/// commits or is abandoned. Terminal states are always recorded as
/// committed, but observers only see one once no ticket is live; until then
/// `Loading` stays published.
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
    ledger: Mutex<Ledger>,
}

impl StateCell {
    /// A cell in `Loading`, with [`INITIAL_TICKET`] already live.
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Loading);
        Self {
            tx,
            ledger: Mutex::new(Ledger {
                next_ticket: INITIAL_TICKET + 1,
                live: BTreeSet::from([INITIAL_TICKET]),
                committed: SessionState::Loading,
            }),
        }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `Loading` and open a transition.
    pub(crate) fn begin(&self) -> Transition<'_> {
        let mut ledger = self.ledger();
        let ticket = ledger.next_ticket;
        ledger.next_ticket += 1;
        ledger.live.insert(ticket);
        self.tx.send_replace(SessionState::Loading);
        Transition::resume(self, ticket)
    }

    fn commit(&self, ticket: u64, state: SessionState) {
        let mut ledger = self.ledger();
        ledger.live.remove(&ticket);
        ledger.committed = state.clone();
        if ledger.live.is_empty() {
            debug!(state = %state, "Session state committed");
            self.tx.send_replace(state);
        } else {
            debug!(state = %state, pending = ledger.live.len(), "Session state committed behind a queued transition");
        }
    }

    fn abandon(&self, ticket: u64) {
        let mut ledger = self.ledger();
        ledger.live.remove(&ticket);
        if !ledger.live.is_empty() {
            debug!(pending = ledger.live.len(), "Transition abandoned while others are in flight");
            return;
        }
        if ledger.committed.is_loading() {
            ledger.committed = SessionState::Error(INTERRUPTED_MESSAGE.to_string());
        }
        let restored = ledger.committed.clone();
        debug!(state = %restored, "Transition abandoned, restoring last committed state");
        self.tx.send_replace(restored);
    }
}

/// An open `Loading` period. Dropping it without [`Transition::commit`]
/// (cancellation, a dropped future, a panic) restores the last committed
/// state.
pub(crate) struct Transition<'a> {
    cell: &'a StateCell,
    ticket: u64,
    settled: bool,
}

impl<'a> Transition<'a> {
    pub(crate) fn resume(cell: &'a StateCell, ticket: u64) -> Self {
        Self {
            cell,
            ticket,
            settled: false,
        }
    }

    pub(crate) fn commit(mut self, state: SessionState) {
        self.settled = true;
        self.cell.commit(self.ticket, state);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cell.abandon(self.ticket);
        }
    }
}
