use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tracing::{debug, info};

use super::{Ledger, LedgerError, LogStream, TxBackend};
use crate::config::Settings;
use crate::contracts::IInfraMarket;
use crate::events::EventKind;
use crate::queue::FeeQuote;
use crate::state::{MarketStatus, Outcome, Phase};

fn parse_url(url: &str) -> Result<reqwest::Url, LedgerError> {
    url.parse()
        .map_err(|e| LedgerError::Transport(format!("bad endpoint {url}: {e}")))
}

/// Read side over HTTP, subscriptions over a fresh websocket each time.
pub struct AlloyLedger {
    rpc: DynProvider,
    wss_url: String,
    infra_market: Address,
    from_block: u64,
}

impl AlloyLedger {
    pub fn connect(settings: &Settings) -> Result<Self, LedgerError> {
        let rpc = ProviderBuilder::new()
            .connect_http(parse_url(&settings.rpc_url)?)
            .erased();
        Ok(Self {
            rpc,
            wss_url: settings.wss_url.clone(),
            infra_market: settings.infra_market,
            from_block: settings.from_block,
        })
    }

    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return, LedgerError> {
        let tx = TransactionRequest::default()
            .to(self.infra_market)
            .input(Bytes::from(call.abi_encode()).into());
        let out = self.rpc.call(tx).await?;
        Ok(C::abi_decode_returns(&out)?)
    }
}

#[async_trait]
impl Ledger for AlloyLedger {
    async fn status(&self, market: Address) -> Result<MarketStatus, LedgerError> {
        let ret = self
            .view(IInfraMarket::statusCall {
                tradingAddr: market,
            })
            .await?;
        let phase = Phase::try_from(ret.state).map_err(LedgerError::UnknownPhase)?;
        Ok(MarketStatus::new(phase, ret.remaining))
    }

    async fn winner(&self, market: Address) -> Result<Outcome, LedgerError> {
        self.view(IInfraMarket::winnerCall {
            tradingAddr: market,
        })
        .await
    }

    async fn epoch_number(&self, market: Address) -> Result<U256, LedgerError> {
        self.view(IInfraMarket::epochNumberCall {
            tradingAddr: market,
        })
        .await
    }

    async fn query_events(
        &self,
        kind: EventKind,
        market: Option<Address>,
    ) -> Result<Vec<Log>, LedgerError> {
        let mut filter = Filter::new()
            .address(self.infra_market)
            .event_signature(kind.topic())
            .from_block(self.from_block);
        if let Some(market) = market {
            filter = match kind.market_topic_index() {
                2 => filter.topic2(market.into_word()),
                _ => filter.topic1(market.into_word()),
            };
        }
        let logs = self.rpc.get_logs(&filter).await?;
        debug!(kind = ?kind, count = logs.len(), "historical logs fetched");
        Ok(logs)
    }

    async fn subscribe(&self) -> Result<LogStream, LedgerError> {
        let ws = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.wss_url.clone()))
            .await
            .map_err(|e| LedgerError::Subscription(e.to_string()))?;
        let filter = Filter::new().address(self.infra_market);
        let sub = ws
            .subscribe_logs(&filter)
            .await
            .map_err(|e| LedgerError::Subscription(e.to_string()))?;
        info!(address = %self.infra_market, "log subscription open");

        // the provider rides in the stream state; dropping the stream closes the socket
        let logs = Box::pin(sub.into_stream());
        let stream = stream::unfold((ws, logs), |(ws, mut logs)| async move {
            let log = logs.next().await?;
            Some((log, (ws, logs)))
        });
        Ok(stream.boxed())
    }
}

/// Signing write path for the keeper's actor.
pub struct AlloySender {
    provider: DynProvider,
    actor: Address,
    poll: Duration,
}

impl AlloySender {
    pub fn connect(settings: &Settings) -> Result<Self, LedgerError> {
        let wallet = EthereumWallet::from(settings.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(parse_url(&settings.rpc_url)?)
            .erased();
        Ok(Self {
            provider,
            actor: settings.actor(),
            poll: settings.receipt_poll,
        })
    }
}

#[async_trait]
impl TxBackend for AlloySender {
    fn actor(&self) -> Address {
        self.actor
    }

    async fn pending_nonce(&self) -> Result<u64, LedgerError> {
        Ok(self
            .provider
            .get_transaction_count(self.actor)
            .pending()
            .await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError> {
        Ok(self.provider.estimate_gas(tx.clone()).await?)
    }

    async fn fee_quote(&self) -> Result<FeeQuote, LedgerError> {
        match self.provider.estimate_eip1559_fees().await {
            Ok(fees) => Ok(FeeQuote::Eip1559 {
                max_fee: fees.max_fee_per_gas,
                max_priority: fees.max_priority_fee_per_gas,
            }),
            Err(e) => {
                debug!(error = %e, "eip-1559 fees unavailable, using gas price");
                let gas_price = self.provider.get_gas_price().await?;
                Ok(FeeQuote::Legacy { gas_price })
            }
        }
    }

    async fn send(&self, tx: TransactionRequest) -> Result<TxHash, LedgerError> {
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn confirm(&self, hash: TxHash, confirmations: u64) -> Result<(), LedgerError> {
        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(hash).await? {
                if !receipt.status() {
                    return Err(LedgerError::Reverted(hash));
                }
                if let Some(mined) = receipt.block_number() {
                    let head = self.provider.get_block_number().await?;
                    if head + 1 >= mined + confirmations {
                        return Ok(());
                    }
                }
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}
