//! Attendance resolution.
//!
//! The inference service answers a poll with a user id and a confidence
//! score. Both fields use zero as "not determined yet", and a result only
//! counts as resolved when neither field carries that sentinel.

use crate::record_store::OwnerId;
use serde::{Deserialize, Serialize};

/// Poll result reported by the inference service.
///
/// Missing fields decode to zero, which is the pending sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(default)]
    pub user_id: OwnerId,
    #[serde(default)]
    pub confidence_score: f32,
}

/// Client-visible state of a poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The inference service identified an owner
    Resolved { owner_id: OwnerId, confidence: f32 },
    /// No identity determined yet
    Pending,
}

/// Classify a decoded poll result.
///
/// Resolved iff `user_id != 0` and `confidence_score != 0.0`; any other
/// combination, including exactly one sentinel, is pending.
pub fn classify(result: &InferenceResult) -> Resolution {
    if result.user_id != 0 && result.confidence_score != 0.0 {
        Resolution::Resolved {
            owner_id: result.user_id,
            confidence: result.confidence_score,
        }
    } else {
        Resolution::Pending
    }
}
