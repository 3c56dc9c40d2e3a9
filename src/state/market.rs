use std::collections::HashMap;

use alloy::primitives::{Address, FixedBytes};
use tokio::task::AbortHandle;

use super::{Phase, TimerKind};

/// Outcome identifier as stored on-chain (`bytes8`).
pub type Outcome = FixedBytes<8>;

/// Armed deferred action. `id` lets the firing task verify it is still the
/// timer the record expects.
#[derive(Debug)]
struct PendingTimer {
    id: u64,
    handle: AbortHandle,
}

/// Per-market state owned by the controller.
///
/// Dropping a record aborts every timer and in-flight task it tracks, so
/// removing it from the table is enough to silence the market.
#[derive(Debug, Default)]
pub struct MarketRecord {
    /// Last phase observed from a status read.
    pub phase: Option<Phase>,
    pub seconds_remaining: u64,
    timers: HashMap<TimerKind, PendingTimer>,
    tasks: Vec<AbortHandle>,
    /// Reveals in arrival order, one per revealer.
    reveals: Vec<(Address, Outcome)>,
    /// Set once the matching intent is queued; each action is pushed at
    /// most once per record.
    pub escaping: bool,
    pub closing: bool,
    pub declared: bool,
    pub swept: bool,
}

impl MarketRecord {
    pub fn has_timer(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Store a timer handle, aborting any prior handle of the same kind.
    pub fn arm(&mut self, kind: TimerKind, id: u64, handle: AbortHandle) {
        if let Some(old) = self.timers.insert(kind, PendingTimer { id, handle }) {
            old.handle.abort();
        }
    }

    /// Abort the pending timer of `kind`. Returns whether one existed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.timers.remove(&kind) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a timer task when it wakes. Returns `false` if the timer
    /// was replaced or cancelled meanwhile. On success the handle moves to
    /// the in-flight set so removal still aborts the action.
    pub fn take_timer(&mut self, kind: TimerKind, id: u64) -> bool {
        match self.timers.get(&kind) {
            Some(timer) if timer.id == id => {
                if let Some(timer) = self.timers.remove(&kind) {
                    self.track(timer.handle);
                }
                true
            }
            _ => false,
        }
    }

    /// Track a spawned task so removal aborts it. Finished tasks are pruned.
    pub fn track(&mut self, handle: AbortHandle) {
        self.tasks.retain(|h| !h.is_finished());
        self.tasks.push(handle);
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }

    /// Record a reveal. A repeated revealer overwrites its earlier outcome.
    pub fn record_reveal(&mut self, revealer: Address, outcome: Outcome) {
        match self.reveals.iter_mut().find(|(r, _)| *r == revealer) {
            Some(entry) => entry.1 = outcome,
            None => self.reveals.push((revealer, outcome)),
        }
    }

    pub fn reveals(&self) -> &[(Address, Outcome)] {
        &self.reveals
    }

    /// Distinct outcomes in first-seen order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        distinct_outcomes(&self.reveals)
    }
}

impl Drop for MarketRecord {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

pub fn distinct_outcomes(reveals: &[(Address, Outcome)]) -> Vec<Outcome> {
    let mut out: Vec<Outcome> = Vec::new();
    for (_, outcome) in reveals {
        if !out.contains(outcome) {
            out.push(*outcome);
        }
    }
    out
}

/// Revealers whose outcome differs from `winner`.
pub fn victims(reveals: &[(Address, Outcome)], winner: Outcome) -> Vec<Address> {
    reveals
        .iter()
        .filter(|(_, outcome)| *outcome != winner)
        .map(|(revealer, _)| *revealer)
        .collect()
}

/// All market records, keyed by trading address.
#[derive(Debug, Default)]
pub struct MarketTable {
    records: HashMap<Address, MarketRecord>,
}

impl MarketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market: &Address) -> Option<&MarketRecord> {
        self.records.get(market)
    }

    pub fn get_mut(&mut self, market: &Address) -> Option<&mut MarketRecord> {
        self.records.get_mut(market)
    }

    /// Fetch the record, creating an empty one on first reference.
    pub fn entry(&mut self, market: Address) -> &mut MarketRecord {
        self.records.entry(market).or_default()
    }

    /// Delete the record; its timers and tasks are aborted on drop.
    pub fn remove(&mut self, market: &Address) -> bool {
        self.records.remove(market).is_some()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, market: &Address) -> bool {
        self.records.contains_key(market)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.records.values().map(MarketRecord::timer_count).sum()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
