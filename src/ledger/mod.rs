//! Boundary to the chain: read calls, log queries, the live subscription
//! and the transaction write path.
//!
//! The controller and queue only see the [`Ledger`] and [`TxBackend`]
//! traits; [`AlloyLedger`] and [`AlloySender`] are the production
//! implementations.

mod rpc;

use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::{Log, TransactionRequest};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::events::EventKind;
use crate::queue::FeeQuote;
use crate::state::{MarketStatus, Outcome};

pub use rpc::{AlloyLedger, AlloySender};

/// Live logs emitted by the infra market.
pub type LogStream = BoxStream<'static, Log>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("abi decode failed: {0}")]
    Decode(#[from] alloy::sol_types::Error),
    #[error("status reported unknown phase {0}")]
    UnknownPhase(u8),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("transaction {0} not confirmed after {1}s")]
    ConfirmTimeout(TxHash, u64),
}

impl From<alloy::transports::TransportError> for LedgerError {
    fn from(err: alloy::transports::TransportError) -> Self {
        LedgerError::Transport(err.to_string())
    }
}

/// Read surface of the infra market.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn status(&self, market: Address) -> Result<MarketStatus, LedgerError>;

    async fn winner(&self, market: Address) -> Result<Outcome, LedgerError>;

    async fn epoch_number(&self, market: Address) -> Result<U256, LedgerError>;

    /// Historical logs of `kind`, optionally narrowed to one trading address
    /// through its indexed topic.
    async fn query_events(
        &self,
        kind: EventKind,
        market: Option<Address>,
    ) -> Result<Vec<Log>, LedgerError>;

    /// Open a live subscription to every log of the infra market.
    async fn subscribe(&self) -> Result<LogStream, LedgerError>;
}

/// Write path used exclusively by the transaction queue.
#[async_trait]
pub trait TxBackend: Send + Sync {
    /// Signing actor address; also the fee recipient.
    fn actor(&self) -> Address;

    async fn pending_nonce(&self) -> Result<u64, LedgerError>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError>;

    async fn fee_quote(&self) -> Result<FeeQuote, LedgerError>;

    async fn send(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError>;

    /// Resolve once `hash` has `confirmations` blocks on top of it.
    async fn confirm(&self, hash: TxHash, confirmations: u64) -> Result<(), LedgerError>;
}
