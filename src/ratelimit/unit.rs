//! Duration tokens used in rate declarations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// A rate window length, written as a short token such as `"s"`, `"5m"` or `"d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Millisecond,
    Millis100,
    Millis250,
    Millis500,
    Second,
    Seconds2,
    Seconds5,
    Seconds10,
    Seconds15,
    Seconds30,
    Seconds45,
    Minute,
    Minutes2,
    Minutes5,
    Minutes10,
    Minutes15,
    Minutes30,
    Minutes45,
    Hour,
    Hours2,
    Hours6,
    Hours12,
    Day,
}

const SECOND: u64 = 1000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl TimeUnit {
    /// Every accepted unit, shortest first.
    pub const ALL: [TimeUnit; 23] = [
        TimeUnit::Millisecond,
        TimeUnit::Millis100,
        TimeUnit::Millis250,
        TimeUnit::Millis500,
        TimeUnit::Second,
        TimeUnit::Seconds2,
        TimeUnit::Seconds5,
        TimeUnit::Seconds10,
        TimeUnit::Seconds15,
        TimeUnit::Seconds30,
        TimeUnit::Seconds45,
        TimeUnit::Minute,
        TimeUnit::Minutes2,
        TimeUnit::Minutes5,
        TimeUnit::Minutes10,
        TimeUnit::Minutes15,
        TimeUnit::Minutes30,
        TimeUnit::Minutes45,
        TimeUnit::Hour,
        TimeUnit::Hours2,
        TimeUnit::Hours6,
        TimeUnit::Hours12,
        TimeUnit::Day,
    ];

    /// Length of this unit in milliseconds.
    pub fn millis(&self) -> u64 {
        match self {
            TimeUnit::Millisecond => 1,
            TimeUnit::Millis100 => 100,
            TimeUnit::Millis250 => 250,
            TimeUnit::Millis500 => 500,
            TimeUnit::Second => SECOND,
            TimeUnit::Seconds2 => 2 * SECOND,
            TimeUnit::Seconds5 => 5 * SECOND,
            TimeUnit::Seconds10 => 10 * SECOND,
            TimeUnit::Seconds15 => 15 * SECOND,
            TimeUnit::Seconds30 => 30 * SECOND,
            TimeUnit::Seconds45 => 45 * SECOND,
            TimeUnit::Minute => MINUTE,
            TimeUnit::Minutes2 => 2 * MINUTE,
            TimeUnit::Minutes5 => 5 * MINUTE,
            TimeUnit::Minutes10 => 10 * MINUTE,
            TimeUnit::Minutes15 => 15 * MINUTE,
            TimeUnit::Minutes30 => 30 * MINUTE,
            TimeUnit::Minutes45 => 45 * MINUTE,
            TimeUnit::Hour => HOUR,
            TimeUnit::Hours2 => 2 * HOUR,
            TimeUnit::Hours6 => 6 * HOUR,
            TimeUnit::Hours12 => 12 * HOUR,
            TimeUnit::Day => DAY,
        }
    }

    /// Get the duration of this unit.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.millis())
    }

    /// The token this unit is written as.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Millisecond => "ms",
            TimeUnit::Millis100 => "100ms",
            TimeUnit::Millis250 => "250ms",
            TimeUnit::Millis500 => "500ms",
            TimeUnit::Second => "s",
            TimeUnit::Seconds2 => "2s",
            TimeUnit::Seconds5 => "5s",
            TimeUnit::Seconds10 => "10s",
            TimeUnit::Seconds15 => "15s",
            TimeUnit::Seconds30 => "30s",
            TimeUnit::Seconds45 => "45s",
            TimeUnit::Minute => "m",
            TimeUnit::Minutes2 => "2m",
            TimeUnit::Minutes5 => "5m",
            TimeUnit::Minutes10 => "10m",
            TimeUnit::Minutes15 => "15m",
            TimeUnit::Minutes30 => "30m",
            TimeUnit::Minutes45 => "45m",
            TimeUnit::Hour => "h",
            TimeUnit::Hours2 => "2h",
            TimeUnit::Hours6 => "6h",
            TimeUnit::Hours12 => "12h",
            TimeUnit::Day => "d",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = TurnstileError;

    fn from_str(token: &str) -> Result<Self> {
        TimeUnit::ALL
            .iter()
            .copied()
            .find(|unit| unit.as_str() == token)
            .ok_or_else(|| TurnstileError::Config(format!("Invalid time unit: {:?}", token)))
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a duration token to milliseconds.
///
/// Only called while compiling a limiter; an unknown token is a configuration error.
pub fn resolve(token: &str) -> Result<u64> {
    token.parse::<TimeUnit>().map(|unit| unit.millis())
}
