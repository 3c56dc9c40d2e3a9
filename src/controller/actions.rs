use alloy::primitives::Address;
use tracing::{debug, info, warn};

use super::{decode_all, MarketController};
use crate::events::{EventKind, MarketEvent};
use crate::queue::TxIntent;
use crate::state::{distinct_outcomes, victims, Outcome, Phase, TimerKind};

impl MarketController {
    pub(crate) fn escape(&self, market: Address) {
        {
            let mut markets = self.inner.markets.lock();
            let record = markets.entry(market);
            if record.escaping {
                debug!(market = %market, "escape already queued");
                return;
            }
            record.escaping = true;
        }
        info!(market = %market, "escaping market");
        self.inner.queue.push(TxIntent::Escape { market });
    }

    /// Push `close` only if a fresh read still reports Closable. Otherwise
    /// treat the earlier read as a race and fall back to a close timer.
    pub(crate) async fn close(&self, market: Address) {
        let status = self.read_status(market).await;
        if status.phase == Phase::Closable {
            {
                let mut markets = self.inner.markets.lock();
                let record = markets.entry(market);
                if record.closing {
                    debug!(market = %market, "close already queued");
                    return;
                }
                record.closing = true;
            }
            info!(market = %market, "closing market");
            self.inner.queue.push(TxIntent::Close {
                market,
                fee_recipient: self.inner.settings.actor,
            });
            return;
        }
        if !self.arm_if(market, TimerKind::Close, status) {
            debug!(market = %market, phase = %status.phase, "market not closable");
        }
    }

    pub(crate) async fn declare(&self, market: Address) {
        let outcomes = {
            let mut markets = self.inner.markets.lock();
            let record = markets.entry(market);
            if record.declared {
                debug!(market = %market, "already declared");
                return;
            }
            record.declared = true;
            record.outcomes()
        };
        let outcomes = if outcomes.is_empty() {
            distinct_outcomes(&self.historical_reveals(market).await)
        } else {
            outcomes
        };
        if outcomes.is_empty() {
            warn!(market = %market, "declaring with no revealed outcomes");
        }

        info!(market = %market, outcomes = outcomes.len(), "declaring market");
        self.inner.queue.push(TxIntent::Declare {
            market,
            outcomes,
            fee_recipient: self.inner.settings.actor,
        });
    }

    /// Penalise revealers that disagree with the declared winner.
    pub(crate) async fn sweep(&self, market: Address) {
        let reveals = {
            let mut markets = self.inner.markets.lock();
            let record = markets.entry(market);
            if record.swept {
                debug!(market = %market, "already swept");
                return;
            }
            record.swept = true;
            record.reveals().to_vec()
        };

        let winner = self
            .retry("winner", market, || self.inner.ledger.winner(market))
            .await;
        let reveals = if reveals.is_empty() {
            self.historical_reveals(market).await
        } else {
            reveals
        };
        let victims = victims(&reveals, winner);
        if victims.is_empty() {
            info!(market = %market, winner = %winner, "no victims, sweep skipped");
            return;
        }
        let epoch = self
            .retry("epochNumber", market, || self.inner.ledger.epoch_number(market))
            .await;

        info!(market = %market, epoch = %epoch, victims = ?victims, "sweeping market");
        self.inner.queue.push(TxIntent::SweepBatch {
            infra_market: self.inner.settings.infra_market,
            market,
            epoch,
            victims,
            fee_recipient: self.inner.settings.actor,
        });
    }

    /// Reveals for one market read from history. Also seeds the record so
    /// later callers hit the accumulator.
    async fn historical_reveals(&self, market: Address) -> Vec<(Address, Outcome)> {
        let logs = self
            .retry("reveal query", market, || {
                self.inner
                    .ledger
                    .query_events(EventKind::CommitmentRevealed, Some(market))
            })
            .await;
        let reveals: Vec<(Address, Outcome)> = decode_all(EventKind::CommitmentRevealed, &logs)
            .filter_map(|event| match event {
                MarketEvent::Revealed {
                    market: m,
                    revealer,
                    outcome,
                } if m == market => Some((revealer, outcome)),
                _ => None,
            })
            .collect();

        if let Some(record) = self.inner.markets.lock().get_mut(&market) {
            for (revealer, outcome) in &reveals {
                record.record_reveal(*revealer, *outcome);
            }
            return record.reveals().to_vec();
        }
        reveals
    }
}

#[cfg(test)]
mod tests {
    use super::super::ControllerSettings;
    use super::*;
    use crate::contracts::IInfraMarket;
    use crate::queue::TxQueueHandle;
    use crate::testutil::{settle, MockLedger, INFRA_MARKET};
    use alloy::primitives::{FixedBytes, U256};
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn outcome(n: u8) -> Outcome {
        FixedBytes::repeat_byte(n)
    }

    fn setup() -> (Arc<MockLedger>, TxQueueHandle, MarketController) {
        let ledger = Arc::new(MockLedger::new());
        let queue = TxQueueHandle::new();
        let controller = MarketController::new(
            ledger.clone(),
            queue.clone(),
            ControllerSettings {
                actor: addr(0xee),
                infra_market: INFRA_MARKET,
                margin: Duration::from_secs(5),
                retry_interval: Duration::from_secs(1),
            },
        );
        (ledger, queue, controller)
    }

    fn reveal_log(ledger: &MockLedger, market: Address, revealer: Address, what: Outcome) {
        ledger.add_log(
            EventKind::CommitmentRevealed,
            market,
            &IInfraMarket::CommitmentRevealed {
                trading: market,
                revealer,
                outcome: what,
                caller: revealer,
                bal: U256::from(1),
            },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_pushes_only_when_closable() {
        let (ledger, queue, controller) = setup();
        ledger.set_status(addr(1), Phase::Closable, 0);
        controller.close(addr(1)).await;
        assert_eq!(queue.len(), 1);

        ledger.set_status(addr(2), Phase::Revealing, 10);
        controller.close(addr(2)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(controller.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_and_escape_pushed_once() {
        let (ledger, queue, controller) = setup();
        ledger.set_status(addr(1), Phase::Closable, 0);
        controller.close(addr(1)).await;
        controller.close(addr(1)).await;
        controller.escape(addr(2));
        controller.escape(addr(2));

        assert_eq!(
            queue.pending(),
            vec![
                TxIntent::Close {
                    market: addr(1),
                    fee_recipient: addr(0xee),
                },
                TxIntent::Escape { market: addr(2) },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_declare_falls_back_to_history() {
        let (ledger, queue, controller) = setup();
        reveal_log(&ledger, addr(1), addr(0xa1), outcome(0xaa));
        reveal_log(&ledger, addr(1), addr(0xa2), outcome(0xbb));
        reveal_log(&ledger, addr(2), addr(0xa3), outcome(0xcc));

        controller.declare(addr(1)).await;
        controller.declare(addr(1)).await;
        assert_eq!(
            queue.pending(),
            vec![TxIntent::Declare {
                market: addr(1),
                outcomes: vec![outcome(0xaa), outcome(0xbb)],
                fee_recipient: addr(0xee),
            }]
        );
        assert_eq!(controller.outcomes(addr(1)).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_falls_back_to_history() {
        let (ledger, queue, controller) = setup();
        ledger.set_winner(addr(1), outcome(0xaa));
        ledger.set_epoch(addr(1), 4);
        reveal_log(&ledger, addr(1), addr(0xa1), outcome(0xaa));
        reveal_log(&ledger, addr(1), addr(0xa2), outcome(0xaa));
        reveal_log(&ledger, addr(1), addr(0xa3), outcome(0xbb));

        controller.sweep(addr(1)).await;
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        match &pending[0] {
            TxIntent::SweepBatch { victims, epoch, .. } => {
                assert_eq!(victims, &vec![addr(0xa3)]);
                assert_eq!(*epoch, U256::from(4));
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_once_and_skips_without_victims() {
        let (ledger, queue, controller) = setup();
        ledger.set_winner(addr(1), outcome(0xaa));
        reveal_log(&ledger, addr(1), addr(0xa1), outcome(0xaa));

        controller.sweep(addr(1)).await;
        assert!(queue.is_empty());

        ledger.set_winner(addr(2), outcome(0xaa));
        reveal_log(&ledger, addr(2), addr(0xa2), outcome(0xbb));
        controller.sweep(addr(2)).await;
        controller.sweep(addr(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_retries_winner_read() {
        let (ledger, queue, controller) = setup();
        controller.inner.markets.lock().entry(addr(1)).record_reveal(addr(0xa1), outcome(0xbb));
        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.sweep(addr(1)).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(queue.is_empty());

        ledger.set_winner(addr(1), outcome(0xaa));
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        task.await.unwrap();
        assert_eq!(queue.len(), 1);
    }
}
