//! EN interval arithmetic.
//!
//! Time is counted in 10-minute windows since the Unix epoch. A TEK is valid
//! for one rolling period of 144 windows, always starting on a multiple of 144.

use crate::error::ValidationError;

/// Length of one EN interval in seconds.
pub const INTERVAL_SECS: u64 = 600;

/// Number of intervals a TEK stays valid for (24 hours).
pub const TEK_ROLLING_PERIOD: u32 = 144;

/// Days of history kept for keys and exposures.
pub const RETENTION_DAYS: u32 = 14;

/// Retention window expressed in intervals.
pub const RETENTION_INTERVALS: u32 = RETENTION_DAYS * TEK_ROLLING_PERIOD;

/// Retention window expressed in seconds.
pub const RETENTION_SECS: u64 = RETENTION_INTERVALS as u64 * INTERVAL_SECS;

/// EN Interval Number: `floor(unix_time / 600)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnIntervalNumber(u32);

impl EnIntervalNumber {
    /// Wrap a raw interval number.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Interval number from a wide integer, rejecting values above `u32::MAX`.
    pub fn try_from_u64(value: u64) -> Result<Self, ValidationError> {
        u32::try_from(value).map(Self).map_err(|_| ValidationError::IntervalOutOfRange(value))
    }

    /// Interval containing the given Unix timestamp.
    pub fn from_unix_secs(secs: u64) -> Result<Self, ValidationError> {
        Self::try_from_u64(secs / INTERVAL_SECS)
    }

    /// Raw interval number.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// First interval of the rolling period containing this interval.
    pub const fn tek_period(self) -> Self {
        Self((self.0 / TEK_ROLLING_PERIOD) * TEK_ROLLING_PERIOD)
    }

    /// Unix timestamp at which this interval starts.
    pub const fn start_unix_secs(self) -> u64 {
        self.0 as u64 * INTERVAL_SECS
    }

    /// Interval `n` windows later, or `None` on overflow.
    pub fn checked_add(self, n: u32) -> Option<Self> {
        self.0.checked_add(n).map(Self)
    }

    /// Interval `n` windows earlier, clamped at zero.
    pub const fn saturating_sub(self, n: u32) -> Self {
        Self(self.0.saturating_sub(n))
    }
}

impl std::fmt::Display for EnIntervalNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EnIntervalNumber> for u32 {
    fn from(enin: EnIntervalNumber) -> Self {
        enin.0
    }
}
