//! Demultiplexes the single live log subscription onto the controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::controller::MarketController;
use crate::events::{EventDecoder, EventKind};
use crate::ledger::{Ledger, LogStream};

/// Immutable `topic[0]` to decoder lookup, built once at start-up.
pub struct TopicTable {
    entries: HashMap<B256, (EventKind, EventDecoder)>,
}

impl TopicTable {
    pub fn new(descriptors: &[(EventKind, EventDecoder)]) -> Self {
        let entries = descriptors
            .iter()
            .map(|&(kind, decoder)| (kind.topic(), (kind, decoder)))
            .collect();
        Self { entries }
    }

    /// Every event the controller acts on.
    pub fn infra_market() -> Self {
        let descriptors: Vec<(EventKind, EventDecoder)> = EventKind::ALL
            .iter()
            .map(|&kind| (kind, kind.decoder()))
            .collect();
        Self::new(&descriptors)
    }

    pub fn get(&self, topic: &B256) -> Option<(EventKind, EventDecoder)> {
        self.entries.get(topic).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct EventRouter {
    table: TopicTable,
    controller: MarketController,
}

impl EventRouter {
    pub fn new(table: TopicTable, controller: MarketController) -> Self {
        info!(topics = table.len(), "event router ready");
        Self { table, controller }
    }

    /// Route one log. Unknown topics are ignored; a log that fails to
    /// decode is logged and dropped. Returns the kind handled, if any.
    pub fn route(&self, log: &Log) -> Option<EventKind> {
        let topic = log.topic0()?;
        let Some((kind, decode)) = self.table.get(topic) else {
            debug!(topic = %topic, "unhandled topic ignored");
            return None;
        };
        match decode(log) {
            Ok(event) => {
                self.controller.handle_event(event);
                Some(kind)
            }
            Err(e) => {
                warn!(kind = ?kind, tx = ?log.transaction_hash, error = %e, "malformed log dropped");
                None
            }
        }
    }

    /// Dispatch logs until shutdown. When the stream ends the router
    /// resubscribes and replays bootstrap before resuming.
    pub async fn run(
        self,
        ledger: Arc<dyn Ledger>,
        mut stream: LogStream,
        mut shutdown: watch::Receiver<bool>,
        retry_interval: Duration,
    ) {
        info!("event router running");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = stream.next() => match next {
                    Some(log) => {
                        self.route(&log);
                    }
                    None => {
                        warn!("log subscription ended, resubscribing");
                        let Some(fresh) = resubscribe(ledger.as_ref(), &mut shutdown, retry_interval).await else {
                            break;
                        };
                        stream = fresh;
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => break,
                            markets = self.controller.bootstrap() => {
                                info!(markets, "caught up after resubscription");
                            }
                        }
                    }
                }
            }
        }
        info!("event router stopped");
    }
}

/// Retry `subscribe` every `retry_interval` until it works or shutdown.
pub(crate) async fn resubscribe(
    ledger: &dyn Ledger,
    shutdown: &mut watch::Receiver<bool>,
    retry_interval: Duration,
) -> Option<LogStream> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(retry_interval) => {}
        }
        match ledger.subscribe().await {
            Ok(stream) => return Some(stream),
            Err(e) => warn!(error = %e, "subscribe failed"),
        }
    }
}
