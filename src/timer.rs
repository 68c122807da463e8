//! Timestamp sources.
//!
//! The timer is chosen once from configuration. `Monotonic` reads
//! [`Instant`] relative to the measurement start in nanoseconds; `Logical`
//! is a process-wide counter that advances by one on every read, which makes
//! traces reproducible in tests.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Available timer implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    /// Monotonic wall clock, nanosecond ticks.
    #[default]
    Monotonic,
    /// Counter incremented per read.
    Logical,
}

impl TimerKind {
    /// Configuration name of the timer.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Monotonic => "monotonic",
            Self::Logical => "logical",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monotonic" | "clock_gettime" | "gettimeofday" => Ok(Self::Monotonic),
            "logical" => Ok(Self::Logical),
            other => Err(Error::new(ErrorKind::InvalidTimer)
                .with_message(format!("unknown timer \"{other}\""))),
        }
    }
}

/// A started clock.
#[derive(Debug)]
pub struct Clock {
    kind: TimerKind,
    origin: Instant,
    logical: AtomicU64,
}

impl Clock {
    /// Starts a clock of the given kind.
    #[must_use]
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            origin: Instant::now(),
            logical: AtomicU64::new(0),
        }
    }

    /// The timer implementation.
    #[must_use]
    pub const fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Reads the current timestamp.
    #[inline]
    pub fn now(&self) -> u64 {
        match self.kind {
            TimerKind::Monotonic => {
                u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
            }
            TimerKind::Logical => self.logical.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Ticks per second.
    #[must_use]
    pub const fn resolution(&self) -> u64 {
        match self.kind {
            TimerKind::Monotonic => 1_000_000_000,
            TimerKind::Logical => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("logical".parse::<TimerKind>().unwrap(), TimerKind::Logical);
        assert_eq!(" Monotonic ".parse::<TimerKind>().unwrap(), TimerKind::Monotonic);
        let err = "tsc-ish".parse::<TimerKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTimer);
        assert!(err.is_fatal());
    }

    #[test]
    fn logical_clock_counts_reads() {
        let clock = Clock::new(TimerKind::Logical);
        assert_eq!(clock.now(), 1);
        assert_eq!(clock.now(), 2);
        assert_eq!(clock.resolution(), 1);
    }

    #[test]
    fn monotonic_clock_does_not_go_back() {
        let clock = Clock::new(TimerKind::Monotonic);
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
