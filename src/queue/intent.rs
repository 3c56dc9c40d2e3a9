use std::fmt;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::contracts::{IBatchSweeper, IInfraMarket};
use crate::state::Outcome;

/// A state-mutating call waiting for the queue. Carries no identity beyond
/// its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxIntent {
    Declare {
        market: Address,
        outcomes: Vec<Outcome>,
        fee_recipient: Address,
    },
    Close {
        market: Address,
        fee_recipient: Address,
    },
    Escape {
        market: Address,
    },
    SweepBatch {
        infra_market: Address,
        market: Address,
        epoch: U256,
        victims: Vec<Address>,
        fee_recipient: Address,
    },
}

/// Contract addresses intents are sent to.
#[derive(Debug, Clone, Copy)]
pub struct Targets {
    pub infra_market: Address,
    pub batch_sweeper: Address,
}

impl TxIntent {
    pub fn market(&self) -> Address {
        match self {
            TxIntent::Declare { market, .. }
            | TxIntent::Close { market, .. }
            | TxIntent::Escape { market }
            | TxIntent::SweepBatch { market, .. } => *market,
        }
    }

    pub fn target(&self, targets: &Targets) -> Address {
        match self {
            TxIntent::SweepBatch { .. } => targets.batch_sweeper,
            _ => targets.infra_market,
        }
    }

    pub fn calldata(&self) -> Bytes {
        match self {
            TxIntent::Declare {
                market,
                outcomes,
                fee_recipient,
            } => IInfraMarket::declareCall {
                tradingAddr: *market,
                outcomes: outcomes.clone(),
                feeRecipient: *fee_recipient,
            }
            .abi_encode(),
            TxIntent::Close {
                market,
                fee_recipient,
            } => IInfraMarket::closeCall {
                tradingAddr: *market,
                feeRecipient: *fee_recipient,
            }
            .abi_encode(),
            TxIntent::Escape { market } => IInfraMarket::escapeCall {
                tradingAddr: *market,
            }
            .abi_encode(),
            TxIntent::SweepBatch {
                infra_market,
                market,
                epoch,
                victims,
                fee_recipient,
            } => IBatchSweeper::sweepBatchCall {
                infraMarket: *infra_market,
                tradingAddr: *market,
                epochNo: *epoch,
                victims: victims.clone(),
                feeRecipient: *fee_recipient,
            }
            .abi_encode(),
        }
        .into()
    }
}

impl fmt::Display for TxIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxIntent::Declare { .. } => "declare",
            TxIntent::Close { .. } => "close",
            TxIntent::Escape { .. } => "escape",
            TxIntent::SweepBatch { .. } => "sweepBatch",
        };
        write!(f, "{}({})", name, self.market())
    }
}
