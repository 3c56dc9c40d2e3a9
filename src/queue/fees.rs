use alloy::rpc::types::TransactionRequest;

/// Network fee data as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
    Eip1559 { max_fee: u128, max_priority: u128 },
    Legacy { gas_price: u128 },
}

impl FeeQuote {
    /// Add `ratio` percent on top of the tip (or the flat gas price). The
    /// boosted tip is also added to the max fee so it stays affordable.
    pub fn boosted(self, ratio: u64) -> FeeQuote {
        let ratio = u128::from(ratio);
        match self {
            FeeQuote::Eip1559 {
                max_fee,
                max_priority,
            } => {
                let tip = max_priority.saturating_add(max_priority.saturating_mul(ratio) / 100);
                FeeQuote::Eip1559 {
                    max_fee: max_fee.saturating_add(tip),
                    max_priority: tip,
                }
            }
            FeeQuote::Legacy { gas_price } => FeeQuote::Legacy {
                gas_price: gas_price.saturating_add(gas_price.saturating_mul(ratio) / 100),
            },
        }
    }

    pub fn apply(self, tx: TransactionRequest) -> TransactionRequest {
        match self {
            FeeQuote::Eip1559 {
                max_fee,
                max_priority,
            } => tx
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(max_priority),
            FeeQuote::Legacy { gas_price } => tx.gas_price(gas_price),
        }
    }
}
