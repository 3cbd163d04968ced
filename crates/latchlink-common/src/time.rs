// ============================================
// File: crates/latchlink-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Certificates, signed timestamps and activity events all carry wall-clock
//! time. Those checks must be testable without waiting days for a
//! certificate to age, so wall time is read through the [`Clock`] trait.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix time in milliseconds
//! - `Clock`: Source of wall-clock time
//! - `SystemClock`: Production clock backed by `SystemTime`
//! - `ManualClock`: Shared, manually advanced clock for tests and the
//!   lock simulator
//!
//! ## ⚠️ Important Note for Next Developer
//! - Timers (keep-alive, backoff, grace) use `tokio::time`, not this
//!   module. `Clock` is only for wall time that is compared against
//!   certificate validity or signed by the cloud.
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Minimum valid Unix timestamp in milliseconds (year 2020).
pub const MIN_VALID_TIMESTAMP_MS: i64 = 1_577_836_800_000;

/// Maximum valid Unix timestamp in milliseconds (year 2100).
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in milliseconds.
///
/// # Example
/// ```
/// use latchlink_common::time::Timestamp;
/// use std::time::Duration;
///
/// let issued = Timestamp::from_millis(1_700_000_000_000);
/// let expiry = issued + Duration::from_secs(3600);
/// assert!(expiry > issued);
/// assert_eq!(expiry.millis_since(issued), 3_600_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from Unix milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Reads the current system time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Returns Unix milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the timestamp as big-endian bytes (wire format).
    #[must_use]
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Creates a timestamp from big-endian bytes.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_be_bytes(bytes))
    }

    /// Checks if the timestamp is within plausible bounds (2020-2100).
    #[must_use]
    pub const fn is_plausible(&self) -> bool {
        self.0 >= MIN_VALID_TIMESTAMP_MS && self.0 <= MAX_VALID_TIMESTAMP_MS
    }

    /// Signed difference `self - earlier` in milliseconds.
    #[must_use]
    pub const fn millis_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns `true` if `self` and `other` are no more than `tolerance`
    /// apart in either direction.
    #[must_use]
    pub fn is_within(&self, other: Timestamp, tolerance: Duration) -> bool {
        let tolerance = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
        self.millis_since(other).unsigned_abs() <= tolerance.unsigned_abs()
    }

    /// Returns the timestamp moved back by `duration`.
    #[must_use]
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(delta))
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        let delta = i64::try_from(rhs.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================
// Clock
// ============================================

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock.
///
/// Clones share the same underlying time, so a test can hand one clone
/// to the credential store and another to a simulated lock and advance
/// both at once.
///
/// # Example
/// ```
/// use latchlink_common::time::{Clock, ManualClock, Timestamp};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
/// let shared = clock.clone();
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(shared.now(), Timestamp::from_secs(1_700_000_060));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.as_millis())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_now_is_plausible() {
        assert!(Timestamp::now().is_plausible());
        assert!(!Timestamp::from_millis(0).is_plausible());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let base = Timestamp::from_secs(1_700_000_000);
        let later = base + Duration::from_millis(1500);
        assert_eq!(later.millis_since(base), 1500);
        assert_eq!(base.millis_since(later), -1500);
        assert_eq!(later.saturating_sub(Duration::from_millis(1500)), base);
    }

    #[test]
    fn test_timestamp_within() {
        let base = Timestamp::from_secs(1_700_000_000);
        assert!(base.is_within(base + Duration::from_secs(30), Duration::from_secs(30)));
        assert!(!base.is_within(base + Duration::from_secs(31), Duration::from_secs(30)));
        assert!(base.is_within(base.saturating_sub(Duration::from_secs(5)), Duration::from_secs(30)));
    }

    #[test]
    fn test_timestamp_wire_bytes() {
        let ts = Timestamp::from_millis(0x0102_0304_0506_0708);
        assert_eq!(ts.to_be_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Timestamp::from_be_bytes(ts.to_be_bytes()), ts);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
        let other = clock.clone();
        clock.advance(Duration::from_secs(10));
        assert_eq!(other.now(), Timestamp::from_secs(1_700_000_010));
        other.set(Timestamp::from_secs(5));
        assert_eq!(clock.now(), Timestamp::from_secs(5));
    }
}
