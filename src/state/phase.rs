use std::fmt;

/// Lifecycle phase reported by the infra market's `status` call.
/// Discriminants match the on-chain `u8` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Callable = 0,
    Closable = 1,
    Whinging = 2,
    Predicting = 3,
    Revealing = 4,
    Declarable = 5,
    Sweeping = 6,
    Closed = 7,
}

impl TryFrom<u8> for Phase {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Phase::Callable,
            1 => Phase::Closable,
            2 => Phase::Whinging,
            3 => Phase::Predicting,
            4 => Phase::Revealing,
            5 => Phase::Declarable,
            6 => Phase::Sweeping,
            7 => Phase::Closed,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One `status` read: the phase and seconds until its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketStatus {
    pub phase: Phase,
    pub seconds_remaining: u64,
}

impl MarketStatus {
    pub fn new(phase: Phase, seconds_remaining: u64) -> Self {
        Self {
            phase,
            seconds_remaining,
        }
    }
}

/// Deferred action kinds. At most one of each is pending per market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Escape,
    Close,
    Declare,
}

impl TimerKind {
    #[cfg(test)]
    pub(crate) const ALL: [TimerKind; 3] = [TimerKind::Escape, TimerKind::Close, TimerKind::Declare];

    /// Phase the ledger must report for a timer of this kind to be armed.
    pub fn arming_phase(self) -> Phase {
        match self {
            TimerKind::Escape => Phase::Callable,
            TimerKind::Close => Phase::Whinging,
            TimerKind::Declare => Phase::Revealing,
        }
    }

    /// Kinds made stale by arming this one.
    pub fn supersedes(self) -> &'static [TimerKind] {
        match self {
            TimerKind::Escape => &[],
            TimerKind::Close => &[TimerKind::Escape],
            TimerKind::Declare => &[TimerKind::Escape, TimerKind::Close],
        }
    }
}
