//! Traffic split between the two slots of a pair.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::Color;
use crate::errors::InvariantViolation;

/// A blue/green weight pair that always sums to 100.
///
/// There is no way to build a split that breaks the sum; deserialization
/// goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSplit")]
pub struct TrafficSplit {
    blue: u8,
    green: u8,
}

#[derive(Deserialize)]
struct RawSplit {
    blue: u8,
    green: u8,
}

impl TryFrom<RawSplit> for TrafficSplit {
    type Error = InvariantViolation;

    fn try_from(raw: RawSplit) -> Result<Self, Self::Error> {
        Self::new(raw.blue, raw.green)
    }
}

impl TrafficSplit {
    /// Creates a split, rejecting weights that do not sum to 100.
    pub fn new(blue: u8, green: u8) -> Result<Self, InvariantViolation> {
        if u16::from(blue) + u16::from(green) == 100 {
            Ok(Self { blue, green })
        } else {
            Err(InvariantViolation::WeightSum {
                blue: blue.into(),
                green: green.into(),
            })
        }
    }

    /// All traffic on `color`.
    #[must_use]
    pub fn all_to(color: Color) -> Self {
        Self::with_weight_on(color, 100)
    }

    /// `weight` on `color` and the complement on the other slot.
    ///
    /// Weights above 100 clamp to 100.
    #[must_use]
    pub fn with_weight_on(color: Color, weight: u8) -> Self {
        let weight = weight.min(100);
        match color {
            Color::Blue => Self {
                blue: weight,
                green: 100 - weight,
            },
            Color::Green => Self {
                blue: 100 - weight,
                green: weight,
            },
        }
    }

    /// Blue weight.
    #[must_use]
    pub fn blue(&self) -> u8 {
        self.blue
    }

    /// Green weight.
    #[must_use]
    pub fn green(&self) -> u8 {
        self.green
    }

    /// Weight on `color`.
    #[must_use]
    pub fn weight(&self, color: Color) -> u8 {
        match color {
            Color::Blue => self.blue,
            Color::Green => self.green,
        }
    }
}

impl fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blue={} green={}", self.blue, self.green)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_must_sum_to_100() {
        assert!(TrafficSplit::new(90, 10).is_ok());
        assert_eq!(
            TrafficSplit::new(60, 60).unwrap_err(),
            InvariantViolation::WeightSum { blue: 60, green: 60 }
        );
        assert!(TrafficSplit::new(255, 0).is_err());
    }

    #[test]
    fn test_with_weight_on() {
        let split = TrafficSplit::with_weight_on(Color::Green, 10);
        assert_eq!(split.blue(), 90);
        assert_eq!(split.weight(Color::Green), 10);
        assert_eq!(TrafficSplit::with_weight_on(Color::Blue, 200), TrafficSplit::all_to(Color::Blue));
    }

    #[test]
    fn test_deserialize_checks_sum() {
        let ok: TrafficSplit = serde_json::from_str(r#"{"blue": 0, "green": 100}"#).unwrap();
        assert_eq!(ok, TrafficSplit::all_to(Color::Green));

        let bad: Result<TrafficSplit, _> = serde_json::from_str(r#"{"blue": 50, "green": 40}"#);
        assert!(bad.is_err());
    }
}
