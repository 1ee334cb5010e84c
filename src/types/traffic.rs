// ABOUTME: Traffic weights between the stable and candidate variants.
// ABOUTME: Construction enforces non-negative integer weights that always sum to 100.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrafficSplitError {
    #[error("traffic weights must sum to 100 (got stable={stable}, candidate={candidate})")]
    BadSum { stable: u16, candidate: u16 },
}

/// Percentage of requests routed to each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSplit", into = "RawSplit")]
pub struct TrafficSplit {
    stable: u8,
    candidate: u8,
}

#[derive(Serialize, Deserialize)]
struct RawSplit {
    stable: u16,
    candidate: u16,
}

impl TrafficSplit {
    /// All traffic on the stable variant; the resting state.
    pub const ALL_STABLE: TrafficSplit = TrafficSplit {
        stable: 100,
        candidate: 0,
    };

    /// All traffic on the candidate variant.
    pub const ALL_CANDIDATE: TrafficSplit = TrafficSplit {
        stable: 0,
        candidate: 100,
    };

    pub fn new(stable: u16, candidate: u16) -> Result<Self, TrafficSplitError> {
        if u32::from(stable) + u32::from(candidate) != 100 {
            return Err(TrafficSplitError::BadSum { stable, candidate });
        }
        Ok(Self {
            stable: stable as u8,
            candidate: candidate as u8,
        })
    }

    /// Split that gives `percent` to the candidate and the rest to stable.
    /// Values above 100 are clamped.
    pub fn candidate_percent(percent: u8) -> Self {
        let candidate = percent.min(100);
        Self {
            stable: 100 - candidate,
            candidate,
        }
    }

    pub fn stable(&self) -> u8 {
        self.stable
    }

    pub fn candidate(&self) -> u8 {
        self.candidate
    }
}

impl Default for TrafficSplit {
    fn default() -> Self {
        Self::ALL_STABLE
    }
}

impl TryFrom<RawSplit> for TrafficSplit {
    type Error = TrafficSplitError;

    fn try_from(raw: RawSplit) -> Result<Self, Self::Error> {
        TrafficSplit::new(raw.stable, raw.candidate)
    }
}

impl From<TrafficSplit> for RawSplit {
    fn from(split: TrafficSplit) -> Self {
        RawSplit {
            stable: split.stable.into(),
            candidate: split.candidate.into(),
        }
    }
}

impl fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stable, self.candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_weights_not_summing_to_100() {
        assert_eq!(
            TrafficSplit::new(90, 20),
            Err(TrafficSplitError::BadSum {
                stable: 90,
                candidate: 20
            })
        );
    }

    #[test]
    fn deserialization_validates_sum() {
        let ok: TrafficSplit = serde_json::from_str(r#"{"stable":50,"candidate":50}"#).unwrap();
        assert_eq!(ok.candidate(), 50);

        let bad = serde_json::from_str::<TrafficSplit>(r#"{"stable":50,"candidate":60}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn candidate_percent_clamps() {
        assert_eq!(TrafficSplit::candidate_percent(250), TrafficSplit::ALL_CANDIDATE);
    }
}
