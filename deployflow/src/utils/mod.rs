//! Utility functions for identifiers, timestamps and durations.

pub mod timestamps;

pub use timestamps::{
    add_duration, iso_timestamp, remaining_until, seconds_to_duration, Timestamp,
    MAX_DURATION_SECONDS,
};

use uuid::Uuid;

/// Generates a time-ordered identifier with a readable prefix.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}
