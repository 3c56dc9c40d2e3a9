use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::MarketController;
use crate::ledger::{Ledger, LogStream};
use crate::router::{EventRouter, TopicTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeeperError {
    #[error("keeper already initialised")]
    AlreadyInitialised,
    #[error("keeper destroyed")]
    Destroyed,
}

enum Lifecycle {
    Idle,
    Starting,
    Running(JoinHandle<()>),
    Destroyed,
}

/// Process-level lifecycle: subscribe, bootstrap, route; then tear down.
pub struct Keeper {
    ledger: Arc<dyn Ledger>,
    controller: MarketController,
    retry_interval: Duration,
    state: Mutex<Lifecycle>,
    stop: watch::Sender<bool>,
}

impl Keeper {
    pub fn new(ledger: Arc<dyn Ledger>, controller: MarketController, retry_interval: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            ledger,
            controller,
            retry_interval,
            state: Mutex::new(Lifecycle::Idle),
            stop,
        }
    }

    /// Flips to `true` when the keeper is destroyed. Other long-running
    /// tasks (queue consumer, heartbeat) stop on it too.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn controller(&self) -> &MarketController {
        &self.controller
    }

    /// Open the subscription first so nothing emitted during the historical
    /// scan is lost, bootstrap, then start routing live logs. Must be
    /// called once.
    pub async fn init(&self) -> Result<(), KeeperError> {
        {
            let mut state = self.state.lock();
            match *state {
                Lifecycle::Idle => *state = Lifecycle::Starting,
                Lifecycle::Destroyed => return Err(KeeperError::Destroyed),
                _ => return Err(KeeperError::AlreadyInitialised),
            }
        }
        info!("keeper starting");

        let mut stop = self.stop.subscribe();
        let stream = tokio::select! {
            biased;
            _ = stop.changed() => return Err(KeeperError::Destroyed),
            stream = self.subscribe() => stream,
        };
        let markets = tokio::select! {
            biased;
            _ = stop.changed() => return Err(KeeperError::Destroyed),
            markets = self.controller.bootstrap() => markets,
        };

        let router = EventRouter::new(TopicTable::infra_market(), self.controller.clone());
        let handle = tokio::spawn(router.run(
            self.ledger.clone(),
            stream,
            stop,
            self.retry_interval,
        ));

        let mut state = self.state.lock();
        if matches!(*state, Lifecycle::Destroyed) {
            // destroyed while bootstrapping; drop whatever it scheduled
            handle.abort();
            self.controller.shutdown();
            return Err(KeeperError::Destroyed);
        }
        *state = Lifecycle::Running(handle);
        info!(markets, "keeper running");
        Ok(())
    }

    async fn subscribe(&self) -> LogStream {
        loop {
            match self.ledger.subscribe().await {
                Ok(stream) => return stream,
                Err(e) => {
                    warn!(error = %e, "subscribe failed, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Cancel every timer, close the subscription and signal shutdown.
    /// Safe before, during or after `init`, and more than once.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Lifecycle::Destroyed);
        self.stop.send_replace(true);
        if let Lifecycle::Running(router) = previous {
            router.abort();
        }
        self.controller.shutdown();
        info!("keeper destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IInfraMarket;
    use crate::controller::ControllerSettings;
    use crate::events::EventKind;
    use crate::queue::TxQueueHandle;
    use crate::state::{Phase, TimerKind};
    use crate::testutil::{settle, MockLedger, INFRA_MARKET};
    use alloy::primitives::{Address, B256};

    fn keeper() -> (Arc<MockLedger>, TxQueueHandle, Arc<Keeper>) {
        let ledger = Arc::new(MockLedger::new());
        let queue = TxQueueHandle::new();
        let controller = MarketController::new(
            ledger.clone(),
            queue.clone(),
            ControllerSettings {
                actor: Address::repeat_byte(0xee),
                infra_market: INFRA_MARKET,
                margin: Duration::from_secs(5),
                retry_interval: Duration::from_secs(1),
            },
        );
        let keeper = Keeper::new(ledger.clone(), controller, Duration::from_secs(1));
        (ledger, queue, Arc::new(keeper))
    }

    fn created(ledger: &MockLedger, market: Address) {
        ledger.add_log(
            EventKind::MarketCreated,
            market,
            &IInfraMarket::MarketCreated2 {
                incentiveSender: Address::ZERO,
                tradingAddr: market,
                desc: B256::ZERO,
                launchTs: 0,
                callDeadline: 0,
            },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_bootstraps_then_routes() {
        let (ledger, _queue, keeper) = keeper();
        let market = Address::repeat_byte(1);
        created(&ledger, market);
        ledger.set_status(market, Phase::Callable, 600);

        keeper.init().await.unwrap();
        settle().await;
        assert!(keeper.controller().has_timer(market, TimerKind::Escape));
        assert_eq!(ledger.subscriptions(), 1);

        assert!(ledger.emit_event(&IInfraMarket::InfraMarketClosed {
            incentiveRecipient: Address::ZERO,
            tradingAddr: market,
            winner: Default::default(),
        }));
        settle().await;
        assert_eq!(keeper.controller().market_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_twice_rejected() {
        let (_ledger, _queue, keeper) = keeper();
        keeper.init().await.unwrap();
        assert_eq!(keeper.init().await, Err(KeeperError::AlreadyInitialised));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_retries_subscribe() {
        let (ledger, _queue, keeper) = keeper();
        ledger.fail_subscribe(3);
        keeper.init().await.unwrap();
        assert_eq!(ledger.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_before_init() {
        let (_ledger, _queue, keeper) = keeper();
        keeper.destroy();
        keeper.destroy();
        assert_eq!(keeper.controller().pending_timers(), 0);
        assert_eq!(keeper.init().await, Err(KeeperError::Destroyed));
        assert!(*keeper.shutdown_signal().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_during_init() {
        let (ledger, _queue, keeper) = keeper();
        ledger.fail_subscribe(usize::MAX);
        let task = {
            let keeper = keeper.clone();
            tokio::spawn(async move { keeper.init().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        keeper.destroy();
        assert_eq!(task.await.unwrap(), Err(KeeperError::Destroyed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_timers_and_subscription() {
        let (ledger, queue, keeper) = keeper();
        let market = Address::repeat_byte(1);
        created(&ledger, market);
        ledger.set_status(market, Phase::Whinging, 60);
        keeper.init().await.unwrap();
        settle().await;
        assert_eq!(keeper.controller().pending_timers(), 1);

        keeper.destroy();
        settle().await;
        assert_eq!(keeper.controller().pending_timers(), 0);
        assert!(!ledger.emit_event(&IInfraMarket::CampaignEscaped {
            tradingAddr: market
        }));

        ledger.set_status(market, Phase::Closable, 0);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(queue.is_empty());
    }
}
