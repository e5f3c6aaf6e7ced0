//! # Status
//!
//! Operator-facing status, derived fresh on every dispatch cycle and never
//! persisted.

use serde::Serialize;

/// Outcome of a dispatch cycle as surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusVerdict {
    /// Credentials are complete and published to every connected consumer.
    Active,
    /// Operator input is wrong or the secret cannot be used; requires a
    /// correction before the next cycle can succeed.
    Blocked(String),
    /// Input is not wrong, merely not there yet (e.g. no credentials
    /// configured).
    Waiting(String),
}

impl StatusVerdict {
    /// Short state name, also used as the metrics label.
    pub fn state(&self) -> &'static str {
        match self {
            StatusVerdict::Active => "active",
            StatusVerdict::Blocked(_) => "blocked",
            StatusVerdict::Waiting(_) => "waiting",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StatusVerdict::Active => "",
            StatusVerdict::Blocked(reason) | StatusVerdict::Waiting(reason) => reason,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, StatusVerdict::Active)
    }
}

impl std::fmt::Display for StatusVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusVerdict::Active => write!(f, "active"),
            StatusVerdict::Blocked(reason) => write!(f, "blocked: {reason}"),
            StatusVerdict::Waiting(reason) => write!(f, "waiting: {reason}"),
        }
    }
}

/// Serializable snapshot of the latest verdict, served on `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: String,
    pub message: String,
    pub last_transition_time: String,
}

impl StatusReport {
    pub fn new(verdict: &StatusVerdict) -> Self {
        Self {
            state: verdict.state().to_string(),
            message: verdict.message().to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self::new(&StatusVerdict::Waiting("starting up".to_string()))
    }
}
