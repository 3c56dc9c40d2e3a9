//! Serialized outbound transaction pipeline for the keeper's actor.
//!
//! Producers push [`TxIntent`]s through a cloneable [`TxQueueHandle`]; a
//! single [`TxQueue`] consumer takes them in insertion order and, for one
//! intent at a time, builds, prices, signs with the next nonce, submits and
//! waits for confirmation. A failing intent is logged and dropped.

mod fees;
mod intent;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use alloy::rpc::types::TransactionRequest;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::ledger::{LedgerError, TxBackend};

pub use fees::FeeQuote;
pub use intent::{Targets, TxIntent};

/// Pipeline step an intent failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Build,
    Fees,
    Submit,
    Confirm,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Build => "build",
            Stage::Fees => "fee estimation",
            Stage::Submit => "submission",
            Stage::Confirm => "confirmation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed for {intent} (nonce {nonce}): {source}")]
pub struct TxError {
    pub stage: Stage,
    pub intent: String,
    /// Reserved nonce, or the next free one for a build failure
    pub nonce: u64,
    #[source]
    pub source: LedgerError,
}

/// Actor nonce sequencing: `base + offset`, offset bumped on every reservation.
#[derive(Debug, Clone, Copy)]
pub struct NonceCounter {
    base: u64,
    offset: u64,
}

impl NonceCounter {
    pub fn new(base: u64) -> Self {
        Self { base, offset: 0 }
    }

    pub fn next(&mut self) -> u64 {
        let nonce = self.base + self.offset;
        self.offset += 1;
        nonce
    }

    /// Nonce the next reservation will return.
    pub fn peek(&self) -> u64 {
        self.base + self.offset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub targets: Targets,
    pub gas_ratio: u64,
    pub confirmations: u64,
    /// Upper bound on the confirmation wait
    pub confirm_timeout: Duration,
    pub failure_pause: Duration,
}

impl From<&Settings> for QueueSettings {
    fn from(s: &Settings) -> Self {
        Self {
            targets: Targets {
                infra_market: s.infra_market,
                batch_sweeper: s.batch_sweeper,
            },
            gas_ratio: s.gas_ratio,
            confirmations: s.confirmations,
            confirm_timeout: s.confirm_timeout,
            failure_pause: s.failure_pause,
        }
    }
}

#[derive(Default)]
struct Shared {
    intents: Mutex<VecDeque<TxIntent>>,
    notify: Notify,
}

impl Shared {
    async fn next(&self) -> TxIntent {
        loop {
            if let Some(intent) = self.intents.lock().pop_front() {
                return intent;
            }
            self.notify.notified().await;
        }
    }
}

/// Producer side of the queue.
#[derive(Clone, Default)]
pub struct TxQueueHandle {
    shared: Arc<Shared>,
}

impl TxQueueHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an intent; returns without waiting for submission.
    pub fn push(&self, intent: TxIntent) {
        debug!(intent = %intent, "intent queued");
        self.shared.intents.lock().push_back(intent);
        self.shared.notify.notify_one();
    }

    /// Discard everything not yet taken by the consumer.
    pub fn flush(&self) -> usize {
        let mut intents = self.shared.intents.lock();
        let dropped = intents.len();
        intents.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.shared.intents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Vec<TxIntent> {
        self.shared.intents.lock().iter().cloned().collect()
    }
}

/// The single consumer. Owns the nonce counter.
pub struct TxQueue {
    backend: Arc<dyn TxBackend>,
    shared: Arc<Shared>,
    nonce: NonceCounter,
    settings: QueueSettings,
}

impl TxQueue {
    pub fn new(
        backend: Arc<dyn TxBackend>,
        handle: &TxQueueHandle,
        base_nonce: u64,
        settings: QueueSettings,
    ) -> Self {
        Self {
            backend,
            shared: handle.shared.clone(),
            nonce: NonceCounter::new(base_nonce),
            settings,
        }
    }

    /// Read the actor's pending nonce and build the consumer around it.
    pub async fn init(
        backend: Arc<dyn TxBackend>,
        handle: &TxQueueHandle,
        settings: QueueSettings,
    ) -> Result<Self, LedgerError> {
        let base = backend.pending_nonce().await?;
        info!(actor = %backend.actor(), base_nonce = base, "tx queue initialised");
        Ok(Self::new(backend, handle, base, settings))
    }

    /// Consume intents until shutdown. An intent already taken is finished
    /// before the loop observes shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("tx queue consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let intent = tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                    continue;
                }
                intent = self.shared.next() => intent,
            };

            match self.dispatch(&intent).await {
                Ok(hash) => info!(intent = %intent, tx = %hash, "transaction confirmed"),
                Err(e) => {
                    error!(stage = %e.stage, nonce = e.nonce, error = %e, "intent dropped");
                    tokio::time::sleep(self.settings.failure_pause).await;
                }
            }
        }
        let left = self.shared.intents.lock().len();
        if left > 0 {
            warn!(pending = left, "tx queue stopped with undispatched intents");
        }
        info!("tx queue consumer stopped");
    }

    /// Run one intent through build, fees, submit and confirm.
    ///
    /// The nonce is reserved once gas estimation succeeds: a call that
    /// reverts at build time leaves no gap, while a failure at any later
    /// stage still consumes its slot.
    pub async fn dispatch(&mut self, intent: &TxIntent) -> Result<TxHash, TxError> {
        let tx = TransactionRequest::default()
            .from(self.backend.actor())
            .to(intent.target(&self.settings.targets))
            .input(intent.calldata().into());
        let gas = match self.backend.estimate_gas(&tx).await {
            Ok(gas) => gas,
            Err(source) => {
                return Err(TxError {
                    stage: Stage::Build,
                    intent: intent.to_string(),
                    nonce: self.nonce.peek(),
                    source,
                })
            }
        };

        let nonce = self.nonce.next();
        let fail = |stage: Stage| {
            let intent = intent.to_string();
            move |source: LedgerError| TxError {
                stage,
                intent,
                nonce,
                source,
            }
        };

        let quote = self
            .backend
            .fee_quote()
            .await
            .map_err(fail(Stage::Fees))?
            .boosted(self.settings.gas_ratio);
        let tx = quote.apply(tx.nonce(nonce).gas_limit(gas));

        let hash = self.backend.send(tx).await.map_err(fail(Stage::Submit))?;
        info!(intent = %intent, nonce, tx = %hash, fees = ?quote, "transaction sent");

        let timeout = self.settings.confirm_timeout;
        let confirm = self.backend.confirm(hash, self.settings.confirmations);
        match tokio::time::timeout(timeout, confirm).await {
            Ok(res) => res.map_err(fail(Stage::Confirm))?,
            Err(_) => {
                let err = LedgerError::ConfirmTimeout(hash, timeout.as_secs());
                return Err(fail(Stage::Confirm)(err));
            }
        }
        Ok(hash)
    }
}
