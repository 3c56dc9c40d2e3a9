//! Per-market state machine.
//!
//! The controller owns the [`MarketTable`]. Event handling is synchronous;
//! anything that needs the ledger runs as a task tracked by the market's
//! record, so removing the record aborts it.
//!
//! # Flow
//! 1. `bootstrap` scans history and pushes every live market through
//!    `dispatch`, the same phase table live events use.
//! 2. `handle_event` reacts to routed logs, arming or firing actions.
//! 3. Timers re-read status when they fire and either push an intent or
//!    re-arm.

mod actions;
mod schedule;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::events::{EventKind, MarketEvent};
use crate::ledger::{Ledger, LedgerError};
use crate::queue::TxQueueHandle;
use crate::state::{MarketStatus, MarketTable, Outcome, Phase, TimerKind};

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Fee and incentive recipient for every submitted call
    pub actor: Address,
    pub infra_market: Address,
    /// Added to every ledger deadline before a timer fires
    pub margin: Duration,
    /// Delay between retries of a failed ledger read
    pub retry_interval: Duration,
}

impl From<&Settings> for ControllerSettings {
    fn from(s: &Settings) -> Self {
        Self {
            actor: s.actor(),
            infra_market: s.infra_market,
            margin: s.margin,
            retry_interval: s.retry_interval,
        }
    }
}

struct Inner {
    ledger: Arc<dyn Ledger>,
    queue: TxQueueHandle,
    settings: ControllerSettings,
    markets: Mutex<MarketTable>,
    next_timer: AtomicU64,
}

#[derive(Clone)]
pub struct MarketController {
    inner: Arc<Inner>,
}

/// Result of the historical scan run by `bootstrap`.
#[derive(Debug, Default)]
struct Scan {
    created: Vec<Address>,
    reveals: Vec<(Address, Address, Outcome)>,
    /// Markets already closed or escaped
    removed: HashSet<Address>,
}

impl MarketController {
    pub fn new(ledger: Arc<dyn Ledger>, queue: TxQueueHandle, settings: ControllerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                queue,
                settings,
                markets: Mutex::new(MarketTable::new()),
                next_timer: AtomicU64::new(1),
            }),
        }
    }

    /// Apply one routed event. Never blocks; ledger work is spawned.
    pub fn handle_event(&self, event: MarketEvent) {
        match event {
            MarketEvent::Created {
                market,
                call_deadline,
            } => {
                let remaining = call_deadline.saturating_sub(unix_now());
                info!(market = %market, remaining, "market created");
                let mut markets = self.inner.markets.lock();
                let record = markets.entry(market);
                if !record.has_timer(TimerKind::Escape) {
                    self.arm_locked(record, market, TimerKind::Escape, remaining);
                }
            }
            MarketEvent::Called { market } => {
                if self.inner.markets.lock().entry(market).cancel(TimerKind::Escape) {
                    info!(market = %market, "escape cancelled");
                }
                let this = self.clone();
                self.spawn_tracked(market, async move {
                    this.schedule(market, TimerKind::Close).await;
                });
            }
            MarketEvent::Closed { market } | MarketEvent::Escaped { market } => {
                if self.inner.markets.lock().remove(&market) {
                    info!(market = %market, "market removed");
                }
            }
            MarketEvent::Revealed {
                market,
                revealer,
                outcome,
            } => {
                debug!(market = %market, revealer = %revealer, outcome = %outcome, "reveal recorded");
                self.inner
                    .markets
                    .lock()
                    .entry(market)
                    .record_reveal(revealer, outcome);
                let this = self.clone();
                self.spawn_tracked(market, async move {
                    this.on_reveal(market).await;
                });
            }
            MarketEvent::Declared { market, winner } => {
                info!(market = %market, winner = %winner, "market declared");
                let this = self.clone();
                self.spawn_tracked(market, async move {
                    this.sweep(market).await;
                });
            }
        }
    }

    /// Catch up with everything that happened while the keeper was away.
    /// The scan is all-or-nothing: on any query failure it is retried whole.
    /// Returns the number of markets dispatched.
    pub async fn bootstrap(&self) -> usize {
        let scan = loop {
            match self.scan().await {
                Ok(scan) => break scan,
                Err(e) => {
                    warn!(error = %e, "bootstrap scan failed, retrying");
                    tokio::time::sleep(self.inner.settings.retry_interval).await;
                }
            }
        };

        {
            let mut markets = self.inner.markets.lock();
            for (market, revealer, outcome) in &scan.reveals {
                if !scan.removed.contains(market) {
                    markets.entry(*market).record_reveal(*revealer, *outcome);
                }
            }
        }

        let mut dispatched = 0;
        for market in scan.created {
            if scan.removed.contains(&market) {
                debug!(market = %market, "finished market skipped");
                continue;
            }
            let this = self.clone();
            self.spawn_tracked(market, async move {
                let status = this.read_status(market).await;
                this.dispatch(market, status).await;
            });
            dispatched += 1;
        }
        info!(markets = dispatched, reveals = scan.reveals.len(), "bootstrap complete");
        dispatched
    }

    async fn scan(&self) -> Result<Scan, LedgerError> {
        let ledger = &self.inner.ledger;
        let created = ledger.query_events(EventKind::MarketCreated, None).await?;
        let revealed = ledger.query_events(EventKind::CommitmentRevealed, None).await?;
        let closed = ledger.query_events(EventKind::MarketClosed, None).await?;
        let escaped = ledger.query_events(EventKind::CampaignEscaped, None).await?;

        let mut scan = Scan::default();
        for event in decode_all(EventKind::MarketCreated, &created) {
            if !scan.created.contains(&event.market()) {
                scan.created.push(event.market());
            }
        }
        for event in decode_all(EventKind::CommitmentRevealed, &revealed) {
            if let MarketEvent::Revealed {
                market,
                revealer,
                outcome,
            } = event
            {
                scan.reveals.push((market, revealer, outcome));
            }
        }
        scan.removed = decode_all(EventKind::MarketClosed, &closed)
            .chain(decode_all(EventKind::CampaignEscaped, &escaped))
            .map(|e| e.market())
            .collect();
        Ok(scan)
    }

    /// Phase table shared by bootstrap and status re-checks.
    async fn dispatch(&self, market: Address, status: MarketStatus) {
        debug!(market = %market, phase = %status.phase, remaining = status.seconds_remaining, "dispatch");
        match status.phase {
            Phase::Callable if status.seconds_remaining == 0 => self.escape(market),
            Phase::Callable => {
                self.arm_if(market, TimerKind::Escape, status);
            }
            Phase::Whinging => {
                self.arm_if(market, TimerKind::Close, status);
            }
            Phase::Closable => self.close(market).await,
            Phase::Revealing => {
                self.arm_if(market, TimerKind::Declare, status);
            }
            Phase::Declarable => self.declare(market).await,
            Phase::Sweeping => self.sweep(market).await,
            Phase::Predicting | Phase::Closed => {}
        }
    }

    /// Cancel every timer and in-flight task across all markets.
    pub fn shutdown(&self) {
        let mut markets = self.inner.markets.lock();
        let count = markets.len();
        markets.clear();
        if count > 0 {
            info!(markets = count, "controller state cleared");
        }
    }

    pub fn market_count(&self) -> usize {
        self.inner.markets.lock().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.markets.lock().pending_timers()
    }

    pub fn has_timer(&self, market: Address, kind: TimerKind) -> bool {
        self.inner
            .markets
            .lock()
            .get(&market)
            .is_some_and(|r| r.has_timer(kind))
    }

    pub fn outcomes(&self, market: Address) -> Vec<Outcome> {
        self.inner
            .markets
            .lock()
            .get(&market)
            .map(|r| r.outcomes())
            .unwrap_or_default()
    }

    /// Spawn `fut` and register it with the market's record, creating the
    /// record if needed. The lock is held across spawn and registration.
    fn spawn_tracked<F>(&self, market: Address, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut markets = self.inner.markets.lock();
        let handle = tokio::spawn(fut);
        markets.entry(market).track(handle.abort_handle());
    }

    /// Status read, retried until it succeeds. Updates the record's
    /// observed phase.
    async fn read_status(&self, market: Address) -> MarketStatus {
        let status = self
            .retry("status", market, || self.inner.ledger.status(market))
            .await;
        if let Some(record) = self.inner.markets.lock().get_mut(&market) {
            record.phase = Some(status.phase);
            record.seconds_remaining = status.seconds_remaining;
        }
        status
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, market: Address, mut f: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        loop {
            match f().await {
                Ok(value) => return value,
                Err(e) => {
                    warn!(market = %market, op, error = %e, "ledger read failed, retrying");
                    tokio::time::sleep(self.inner.settings.retry_interval).await;
                }
            }
        }
    }
}

fn decode_all(kind: EventKind, logs: &[alloy::rpc::types::Log]) -> impl Iterator<Item = MarketEvent> + '_ {
    let decode = kind.decoder();
    logs.iter().filter_map(move |log| match decode(log) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(kind = ?kind, error = %e, "undecodable historical log skipped");
            None
        }
    })
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
