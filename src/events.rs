//! Event kinds the keeper acts on and their typed decodings.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use crate::contracts::IInfraMarket;
use crate::state::Outcome;

/// Infra market events routed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MarketCreated,
    CallMade,
    MarketClosed,
    CampaignEscaped,
    CommitmentRevealed,
    Declared,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::MarketCreated,
        EventKind::CallMade,
        EventKind::MarketClosed,
        EventKind::CampaignEscaped,
        EventKind::CommitmentRevealed,
        EventKind::Declared,
    ];

    /// Canonical Solidity signature.
    pub fn signature(self) -> &'static str {
        match self {
            EventKind::MarketCreated => IInfraMarket::MarketCreated2::SIGNATURE,
            EventKind::CallMade => IInfraMarket::CallMade::SIGNATURE,
            EventKind::MarketClosed => IInfraMarket::InfraMarketClosed::SIGNATURE,
            EventKind::CampaignEscaped => IInfraMarket::CampaignEscaped::SIGNATURE,
            EventKind::CommitmentRevealed => IInfraMarket::CommitmentRevealed::SIGNATURE,
            EventKind::Declared => IInfraMarket::Declared::SIGNATURE,
        }
    }

    /// keccak256 of the signature (`topic[0]`).
    pub fn topic(self) -> B256 {
        match self {
            EventKind::MarketCreated => IInfraMarket::MarketCreated2::SIGNATURE_HASH,
            EventKind::CallMade => IInfraMarket::CallMade::SIGNATURE_HASH,
            EventKind::MarketClosed => IInfraMarket::InfraMarketClosed::SIGNATURE_HASH,
            EventKind::CampaignEscaped => IInfraMarket::CampaignEscaped::SIGNATURE_HASH,
            EventKind::CommitmentRevealed => IInfraMarket::CommitmentRevealed::SIGNATURE_HASH,
            EventKind::Declared => IInfraMarket::Declared::SIGNATURE_HASH,
        }
    }

    /// Topic position holding the trading address, for filtered queries.
    pub fn market_topic_index(self) -> usize {
        match self {
            EventKind::MarketCreated | EventKind::MarketClosed => 2,
            _ => 1,
        }
    }

    pub fn decoder(self) -> EventDecoder {
        match self {
            EventKind::MarketCreated => decode_created,
            EventKind::CallMade => decode_called,
            EventKind::MarketClosed => decode_closed,
            EventKind::CampaignEscaped => decode_escaped,
            EventKind::CommitmentRevealed => decode_revealed,
            EventKind::Declared => decode_declared,
        }
    }
}

pub type EventDecoder = fn(&Log) -> Result<MarketEvent, alloy::sol_types::Error>;

/// A decoded infra market event, reduced to what the controller needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Created { market: Address, call_deadline: u64 },
    Called { market: Address },
    Closed { market: Address },
    Escaped { market: Address },
    Revealed {
        market: Address,
        revealer: Address,
        outcome: Outcome,
    },
    Declared { market: Address, winner: Outcome },
}

impl MarketEvent {
    pub fn market(&self) -> Address {
        match self {
            MarketEvent::Created { market, .. }
            | MarketEvent::Called { market }
            | MarketEvent::Closed { market }
            | MarketEvent::Escaped { market }
            | MarketEvent::Revealed { market, .. }
            | MarketEvent::Declared { market, .. } => *market,
        }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            MarketEvent::Created { .. } => EventKind::MarketCreated,
            MarketEvent::Called { .. } => EventKind::CallMade,
            MarketEvent::Closed { .. } => EventKind::MarketClosed,
            MarketEvent::Escaped { .. } => EventKind::CampaignEscaped,
            MarketEvent::Revealed { .. } => EventKind::CommitmentRevealed,
            MarketEvent::Declared { .. } => EventKind::Declared,
        }
    }
}

fn decode<E: SolEvent>(log: &Log) -> Result<E, alloy::sol_types::Error> {
    E::decode_log(&log.inner).map(|decoded| decoded.data)
}

fn decode_created(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::MarketCreated2 = decode(log)?;
    Ok(MarketEvent::Created {
        market: ev.tradingAddr,
        call_deadline: ev.callDeadline,
    })
}

fn decode_called(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::CallMade = decode(log)?;
    Ok(MarketEvent::Called {
        market: ev.tradingAddr,
    })
}

fn decode_closed(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::InfraMarketClosed = decode(log)?;
    Ok(MarketEvent::Closed {
        market: ev.tradingAddr,
    })
}

fn decode_escaped(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::CampaignEscaped = decode(log)?;
    Ok(MarketEvent::Escaped {
        market: ev.tradingAddr,
    })
}

fn decode_revealed(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::CommitmentRevealed = decode(log)?;
    Ok(MarketEvent::Revealed {
        market: ev.trading,
        revealer: ev.revealer,
        outcome: ev.outcome,
    })
}

fn decode_declared(log: &Log) -> Result<MarketEvent, alloy::sol_types::Error> {
    let ev: IInfraMarket::Declared = decode(log)?;
    Ok(MarketEvent::Declared {
        market: ev.trading,
        winner: ev.winningOutcome,
    })
}

/// Build an rpc log carrying `event`, as a node would deliver it.
#[cfg(test)]
pub(crate) fn log_for<E: SolEvent>(address: Address, event: &E) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{keccak256, FixedBytes, U256};
    use std::collections::HashSet;

    #[test]
    fn test_topics_are_signature_hashes() {
        let topics: HashSet<B256> = EventKind::ALL.iter().map(|k| k.topic()).collect();
        assert_eq!(topics.len(), 6);
        for kind in EventKind::ALL {
            assert_eq!(kind.topic(), keccak256(kind.signature()));
        }
        assert_eq!(
            EventKind::CampaignEscaped.signature(),
            "CampaignEscaped(address)"
        );
    }

    #[test]
    fn test_decode_created() {
        let market = Address::repeat_byte(0x11);
        let log = log_for(
            Address::repeat_byte(0x01),
            &IInfraMarket::MarketCreated2 {
                incentiveSender: Address::repeat_byte(0x22),
                tradingAddr: market,
                desc: B256::ZERO,
                launchTs: 100,
                callDeadline: 3700,
            },
        );
        let decoded = EventKind::MarketCreated.decoder()(&log).unwrap();
        assert_eq!(
            decoded,
            MarketEvent::Created {
                market,
                call_deadline: 3700
            }
        );
        assert_eq!(decoded.kind(), EventKind::MarketCreated);
        // trading address is the second indexed argument
        assert_eq!(
            log.topics()[EventKind::MarketCreated.market_topic_index()],
            market.into_word()
        );
    }

    #[test]
    fn test_decode_revealed() {
        let market = Address::repeat_byte(0x11);
        let revealer = Address::repeat_byte(0x33);
        let outcome = FixedBytes::<8>::repeat_byte(0xaa);
        let log = log_for(
            Address::ZERO,
            &IInfraMarket::CommitmentRevealed {
                trading: market,
                revealer,
                outcome,
                caller: revealer,
                bal: U256::from(5),
            },
        );
        let decoded = EventKind::CommitmentRevealed.decoder()(&log).unwrap();
        assert_eq!(
            decoded,
            MarketEvent::Revealed {
                market,
                revealer,
                outcome
            }
        );
        assert_eq!(decoded.market(), market);
    }

    #[test]
    fn test_decode_wrong_event_fails() {
        let log = log_for(
            Address::ZERO,
            &IInfraMarket::CampaignEscaped {
                tradingAddr: Address::repeat_byte(0x11),
            },
        );
        assert!(EventKind::Declared.decoder()(&log).is_err());
        assert!(EventKind::CampaignEscaped.decoder()(&log).is_ok());
    }
}
