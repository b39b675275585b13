//! Period tokens
//!
//! Chart clients ask for history as `/bucket/{period}/{count}` where the
//! period is a short human token: a decimal multiplier followed by a unit.
//!
//! ```text
//! "15min"   -> 900 s
//! "2hours"  -> 7200 s
//! "1day"    -> 86400 s
//! "3"       -> 180 s      (no unit means minutes)
//! ```
//!
//! Recognised units (case-insensitive):
//!
//! | Unit                              | Seconds    |
//! |-----------------------------------|------------|
//! | `min`, `mins`, `minute`, `minutes`| 60         |
//! | `hour`, `hours`                   | 3 600      |
//! | `day`, `days`                     | 86 400     |
//! | `week`, `weeks`                   | 604 800    |
//! | `month`, `months`                 | 2 592 000  |
//!
//! A month is a fixed 30 days, not a calendar month. Buckets must have a
//! constant width to stay epoch-anchored.

use core::fmt;
use core::num::NonZeroU64;
use core::str::FromStr;

use serde::Serialize;

use crate::errors::{ValidationError, ValidationResult};

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 86_400;
const SECONDS_PER_WEEK: u64 = 604_800;
const SECONDS_PER_MONTH: u64 = 2_592_000;

/// Unit used when the token has digits only
const DEFAULT_UNIT_SECONDS: u64 = SECONDS_PER_MINUTE;

const UNITS: &[(&str, u64)] = &[
    ("min", SECONDS_PER_MINUTE),
    ("mins", SECONDS_PER_MINUTE),
    ("minute", SECONDS_PER_MINUTE),
    ("minutes", SECONDS_PER_MINUTE),
    ("hour", SECONDS_PER_HOUR),
    ("hours", SECONDS_PER_HOUR),
    ("day", SECONDS_PER_DAY),
    ("days", SECONDS_PER_DAY),
    ("week", SECONDS_PER_WEEK),
    ("weeks", SECONDS_PER_WEEK),
    ("month", SECONDS_PER_MONTH),
    ("months", SECONDS_PER_MONTH),
];

/// Canonical bucket width, a positive number of seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BucketWidth(NonZeroU64);

impl BucketWidth {
    /// Widest accepted bucket; its width in milliseconds still fits an
    /// `i64` column
    pub const MAX_SECONDS: u64 = i64::MAX as u64 / 1000;

    /// Width of `seconds`, `None` for zero or above [`Self::MAX_SECONDS`]
    pub fn from_seconds(seconds: u64) -> Option<Self> {
        if seconds > Self::MAX_SECONDS {
            return None;
        }
        NonZeroU64::new(seconds).map(Self)
    }

    /// Width in seconds
    pub fn seconds(self) -> u64 {
        self.0.get()
    }

    /// Width in milliseconds
    pub fn millis(self) -> u64 {
        // from_seconds guarantees this does not overflow
        self.0.get() * 1000
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds())
    }
}

impl FromStr for BucketWidth {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_period(s)
    }
}

/// Parse a period token into a bucket width
///
/// Pure: never reads the clock or touches storage.
pub fn parse_period(token: &str) -> ValidationResult<BucketWidth> {
    let token = token.trim().to_ascii_lowercase();

    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    if digits_end == 0 {
        return Err(ValidationError::MissingPeriodDigits);
    }
    let (digits, unit) = token.split_at(digits_end);

    let multiplier: u64 = digits
        .parse()
        .map_err(|_| ValidationError::PeriodOverflow(token.clone()))?;
    if multiplier == 0 {
        return Err(ValidationError::ZeroPeriod);
    }

    let unit_seconds = if unit.is_empty() {
        DEFAULT_UNIT_SECONDS
    } else {
        unit_seconds(unit).ok_or_else(|| ValidationError::UnknownUnit(unit.to_string()))?
    };

    multiplier
        .checked_mul(unit_seconds)
        .and_then(BucketWidth::from_seconds)
        .ok_or(ValidationError::PeriodOverflow(token))
}

fn unit_seconds(unit: &str) -> Option<u64> {
    UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|&(_, seconds)| seconds)
}
