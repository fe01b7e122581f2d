//! Timestamp and duration helpers.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use deployflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Longest duration any configured wait may take: thirty days.
pub const MAX_DURATION_SECONDS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Converts fractional seconds from configuration into a `Duration`.
///
/// Negative and NaN values clamp to zero, anything above
/// [`MAX_DURATION_SECONDS`] clamps to that bound.
#[must_use]
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds.min(MAX_DURATION_SECONDS)).unwrap_or(Duration::ZERO)
}

/// Adds a std `Duration` to a wall-clock timestamp, saturating on overflow.
#[must_use]
pub fn add_duration(at: Timestamp, duration: Duration) -> Timestamp {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns how long remains until `deadline`, or zero if it has passed.
#[must_use]
pub fn remaining_until(deadline: Timestamp) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_duration() {
        assert_eq!(seconds_to_duration(1.5), Duration::from_millis(1500));
        assert_eq!(seconds_to_duration(-3.0), Duration::ZERO);
        assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_seconds_to_duration_clamps_huge_values() {
        let bound = Duration::from_secs(30 * 24 * 60 * 60);
        assert_eq!(seconds_to_duration(1e30), bound);
        assert_eq!(seconds_to_duration(f64::INFINITY), bound);
    }

    #[test]
    fn test_add_duration() {
        let now = Utc::now();
        let later = add_duration(now, Duration::from_secs(300));
        assert_eq!((later - now).num_seconds(), 300);
    }

    #[test]
    fn test_remaining_until_past_deadline() {
        let past = Utc::now() - chrono::Duration::seconds(10);
        assert_eq!(remaining_until(past), Duration::ZERO);
    }
}
