//! In-memory ledger and transaction backend for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::rpc::types::{Log, TransactionRequest};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::events::{log_for, EventKind};
use crate::ledger::{Ledger, LedgerError, LogStream, TxBackend};
use crate::queue::{FeeQuote, Stage};
use crate::state::{MarketStatus, Outcome, Phase};

/// Let spawned tasks run to their next real suspension point.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

fn transport(msg: &str) -> LedgerError {
    LedgerError::Transport(msg.to_string())
}

pub const INFRA_MARKET: Address = Address::new([0x01; 20]);

#[derive(Default)]
pub struct MockLedger {
    statuses: Mutex<HashMap<Address, MarketStatus>>,
    winners: Mutex<HashMap<Address, Outcome>>,
    epochs: Mutex<HashMap<Address, U256>>,
    logs: Mutex<Vec<(EventKind, Address, Log)>>,
    status_failures: AtomicUsize,
    query_failures: AtomicUsize,
    subscribe_failures: AtomicUsize,
    status_calls: AtomicUsize,
    query_calls: AtomicUsize,
    subscriptions: AtomicUsize,
    live: Mutex<Option<mpsc::UnboundedSender<Log>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, market: Address, phase: Phase, seconds_remaining: u64) {
        self.statuses
            .lock()
            .insert(market, MarketStatus::new(phase, seconds_remaining));
    }

    pub fn set_winner(&self, market: Address, winner: Outcome) {
        self.winners.lock().insert(market, winner);
    }

    pub fn set_epoch(&self, market: Address, epoch: u64) {
        self.epochs.lock().insert(market, U256::from(epoch));
    }

    /// Add a historical log for `market`.
    pub fn add_log<E: SolEvent>(&self, kind: EventKind, market: Address, event: &E) {
        self.logs
            .lock()
            .push((kind, market, log_for(INFRA_MARKET, event)));
    }

    pub fn fail_status(&self, times: usize) {
        self.status_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, times: usize) {
        self.query_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, times: usize) {
        self.subscribe_failures.store(times, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Deliver a log on the live subscription. Returns false if none is open.
    pub fn emit(&self, log: Log) -> bool {
        match self.live.lock().as_ref() {
            Some(tx) => tx.send(log).is_ok(),
            None => false,
        }
    }

    pub fn emit_event<E: SolEvent>(&self, event: &E) -> bool {
        self.emit(log_for(INFRA_MARKET, event))
    }

    /// End the current live stream, as a dropped socket would.
    pub fn close_subscription(&self) {
        self.live.lock().take();
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn status(&self, market: Address) -> Result<MarketStatus, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.status_failures) {
            return Err(transport("status unavailable"));
        }
        Ok(self
            .statuses
            .lock()
            .get(&market)
            .copied()
            .unwrap_or(MarketStatus::new(Phase::Closed, 0)))
    }

    async fn winner(&self, market: Address) -> Result<Outcome, LedgerError> {
        self.winners
            .lock()
            .get(&market)
            .copied()
            .ok_or_else(|| transport("no winner"))
    }

    async fn epoch_number(&self, market: Address) -> Result<U256, LedgerError> {
        Ok(self.epochs.lock().get(&market).copied().unwrap_or_default())
    }

    async fn query_events(
        &self,
        kind: EventKind,
        market: Option<Address>,
    ) -> Result<Vec<Log>, LedgerError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.query_failures) {
            return Err(transport("getLogs failed"));
        }
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|(k, m, _)| *k == kind && market.map_or(true, |want| want == *m))
            .map(|(_, _, log)| log.clone())
            .collect())
    }

    async fn subscribe(&self) -> Result<LogStream, LedgerError> {
        if Self::take_failure(&self.subscribe_failures) {
            return Err(LedgerError::Subscription("ws refused".to_string()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.live.lock() = Some(tx);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|log| (log, rx))
        });
        Ok(stream.boxed())
    }
}

/// A transaction as handed to [`TxBackend::send`].
#[derive(Debug, Clone)]
pub struct SentTx {
    pub nonce: u64,
    pub to: Address,
    pub calldata: Bytes,
    pub tx: TransactionRequest,
}

pub struct MockBackend {
    actor: Address,
    nonce: u64,
    sent: Mutex<Vec<SentTx>>,
    calls: Mutex<HashMap<Stage, usize>>,
    failing: Mutex<HashSet<(Stage, usize)>>,
    confirm_delays: Mutex<VecDeque<u64>>,
    hashes: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            actor: Address::repeat_byte(0xee),
            nonce: 0,
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            confirm_delays: Mutex::new(VecDeque::new()),
            hashes: AtomicU64::new(1),
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Make the `index`-th (0-based) call of `stage` fail. `Build` is gas
    /// estimation, `Fees` the fee quote, `Submit` the send and `Confirm`
    /// the confirmation wait.
    pub fn fail_at(&self, stage: Stage, index: usize) {
        self.failing.lock().insert((stage, index));
    }

    /// Per-send confirmation latency in milliseconds, consumed in order.
    pub fn confirm_delays(&self, millis: &[u64]) {
        self.confirm_delays.lock().extend(millis.iter().copied());
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.sent.lock().clone()
    }

    fn check(&self, stage: Stage) -> Result<(), LedgerError> {
        let index = {
            let mut calls = self.calls.lock();
            let count = calls.entry(stage).or_insert(0);
            *count += 1;
            *count - 1
        };
        if self.failing.lock().contains(&(stage, index)) {
            return Err(transport(&format!("{stage} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl TxBackend for MockBackend {
    fn actor(&self) -> Address {
        self.actor
    }

    async fn pending_nonce(&self) -> Result<u64, LedgerError> {
        Ok(self.nonce)
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, LedgerError> {
        self.check(Stage::Build)?;
        Ok(21_000)
    }

    async fn fee_quote(&self) -> Result<FeeQuote, LedgerError> {
        self.check(Stage::Fees)?;
        Ok(FeeQuote::Eip1559 {
            max_fee: 1_000,
            max_priority: 100,
        })
    }

    async fn send(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError> {
        self.check(Stage::Submit)?;
        let sent = SentTx {
            nonce: tx.nonce.unwrap_or_default(),
            to: tx.to.and_then(|kind| kind.to().copied()).unwrap_or_default(),
            calldata: tx.input.input().cloned().unwrap_or_default(),
            tx,
        };
        self.sent.lock().push(sent);
        let n = self.hashes.fetch_add(1, Ordering::SeqCst);
        Ok(B256::left_padding_from(&n.to_be_bytes()))
    }

    async fn confirm(&self, _hash: TxHash, _confirmations: u64) -> Result<(), LedgerError> {
        self.check(Stage::Confirm)?;
        let delay = self.confirm_delays.lock().pop_front().unwrap_or(0);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }
}
