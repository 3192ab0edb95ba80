// Tri-state result of a correlated exchange.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    /// The peer completed and produced a payload.
    Success(serde_json::Value),
    /// The peer could not be created, its setup failed, or it reported failure.
    Failure(String),
    /// The peer was torn down before producing a result.
    Cancelled,
}

impl Outcome {
    pub fn success(payload: impl Into<serde_json::Value>) -> Self {
        Self::Success(payload.into())
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success(payload) => Some(payload),
            _ => None,
        }
    }
}
