use std::sync::atomic::Ordering;
use std::time::Duration;

use alloy::primitives::Address;
use tracing::{debug, info};

use super::MarketController;
use crate::state::{MarketRecord, MarketStatus, Phase, TimerKind};

impl MarketController {
    /// Arm a timer of `kind` from a fresh status read.
    ///
    /// No-op if one is already pending or the ledger no longer reports the
    /// phase that justifies `kind`. Superseded kinds are cancelled first.
    pub(crate) async fn schedule(&self, market: Address, kind: TimerKind) {
        {
            let mut markets = self.inner.markets.lock();
            let Some(record) = markets.get_mut(&market) else {
                return;
            };
            if record.has_timer(kind) {
                return;
            }
            cancel_superseded(record, market, kind);
        }

        let status = self.read_status(market).await;
        self.arm_if(market, kind, status);
    }

    /// Arm `kind` for `status.seconds_remaining + margin` if `status` still
    /// justifies it. Re-checks pending timers under the lock since the
    /// caller may have been suspended. Returns whether a timer was armed.
    pub(crate) fn arm_if(&self, market: Address, kind: TimerKind, status: MarketStatus) -> bool {
        if status.phase != kind.arming_phase() {
            debug!(market = %market, kind = ?kind, phase = %status.phase, "phase moved on, not arming");
            return false;
        }
        let mut markets = self.inner.markets.lock();
        let Some(record) = markets.get_mut(&market) else {
            return false;
        };
        if record.has_timer(kind) {
            return false;
        }
        cancel_superseded(record, market, kind);
        record.phase = Some(status.phase);
        record.seconds_remaining = status.seconds_remaining;
        self.arm_locked(record, market, kind, status.seconds_remaining);
        true
    }

    /// Spawn the timer task and store its handle. Caller holds the lock.
    pub(crate) fn arm_locked(
        &self,
        record: &mut MarketRecord,
        market: Address,
        kind: TimerKind,
        seconds: u64,
    ) {
        let id = self.inner.next_timer.fetch_add(1, Ordering::Relaxed);
        let delay = Duration::from_secs(seconds) + self.inner.settings.margin;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(market, kind, id).await;
        });
        record.arm(kind, id, handle.abort_handle());
        info!(market = %market, kind = ?kind, in_secs = delay.as_secs(), "timer armed");
    }

    async fn fire(&self, market: Address, kind: TimerKind, id: u64) {
        {
            let mut markets = self.inner.markets.lock();
            let Some(record) = markets.get_mut(&market) else {
                return;
            };
            if !record.take_timer(kind, id) {
                debug!(market = %market, kind = ?kind, "stale timer ignored");
                return;
            }
        }
        info!(market = %market, kind = ?kind, "timer fired");

        match kind {
            TimerKind::Escape => self.escape(market),
            TimerKind::Close => self.close(market).await,
            TimerKind::Declare => {
                let status = self.read_status(market).await;
                match status.phase {
                    Phase::Declarable => self.declare(market).await,
                    _ => {
                        self.arm_if(market, TimerKind::Declare, status);
                    }
                }
            }
        }
    }

    /// Follow-up to a reveal: declare right away if the market is already
    /// declarable, otherwise make sure a declare timer is pending.
    pub(crate) async fn on_reveal(&self, market: Address) {
        if self
            .inner
            .markets
            .lock()
            .get(&market)
            .map_or(true, |r| r.has_timer(TimerKind::Declare) || r.declared)
        {
            return;
        }
        let status = self.read_status(market).await;
        match status.phase {
            Phase::Declarable => self.declare(market).await,
            _ => {
                self.arm_if(market, TimerKind::Declare, status);
            }
        }
    }
}

fn cancel_superseded(record: &mut MarketRecord, market: Address, kind: TimerKind) {
    for stale in kind.supersedes() {
        if record.cancel(*stale) {
            info!(market = %market, cancelled = ?stale, by = ?kind, "superseded timer cancelled");
        }
    }
}
