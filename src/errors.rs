//! Typed error hierarchy for the alertflow engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `ProviderError`: a single backend call (AI provider or SOAR) failed
//! - `OrchestratorError`: coordinator, progress channel and feedback ledger failures

use std::time::Duration;

use alertflow_common::Stage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a backend call failed. Drives the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    Overloaded,
    InvalidInput,
    Authentication,
    Unsupported,
    InvalidResponse,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Overloaded => "overloaded",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Authentication => "authentication",
            FailureKind::Unsupported => "unsupported",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from one external backend call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("transient {kind} error: {message}")]
    Transient { kind: FailureKind, message: String },

    #[error("{kind} error: {message}")]
    Terminal { kind: FailureKind, message: String },
}

impl ProviderError {
    pub fn transient(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn terminal(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Terminal {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::transient(
            FailureKind::Timeout,
            format!("no response within {}s", limit.as_secs_f64()),
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { kind, .. } | Self::Terminal { kind, .. } => *kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Terminal { message, .. } => message,
        }
    }

    /// Classify an HTTP status the way every backend client does:
    /// 408, 429 and 5xx are worth retrying, other 4xx are not.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 300));
        match status {
            408 => Self::transient(FailureKind::Timeout, message),
            429 | 503 => Self::transient(FailureKind::Overloaded, message),
            401 | 403 => Self::terminal(FailureKind::Authentication, message),
            404 | 405 | 501 => Self::terminal(FailureKind::Unsupported, message),
            500..=599 => Self::transient(FailureKind::Network, message),
            _ => Self::terminal(FailureKind::InvalidInput, message),
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient(FailureKind::Timeout, err.to_string())
        } else if err.is_decode() {
            Self::terminal(FailureKind::InvalidResponse, err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else {
            Self::transient(FailureKind::Network, err.to_string())
        }
    }
}

/// Errors from the coordinator, progress channel and feedback ledger.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(String),

    #[error("Alert {alert_id} not found")]
    AlertNotFound { alert_id: String },

    #[error("Claim for {stage} on alert {alert_id} expired before its result arrived")]
    ClaimExpired { alert_id: String, stage: Stage },

    #[error("Progress backlog for alert {alert_id} no longer holds sequence {requested}; resync from status")]
    BacklogOverflow { alert_id: String, requested: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_retry_policy() {
        assert!(ProviderError::from_status(408, "").is_transient());
        assert!(ProviderError::from_status(429, "").is_transient());
        assert!(ProviderError::from_status(502, "bad gateway").is_transient());
        assert!(!ProviderError::from_status(400, "").is_transient());
        assert!(!ProviderError::from_status(501, "").is_transient());

        let auth = ProviderError::from_status(401, "nope");
        assert_eq!(auth.kind(), FailureKind::Authentication);
        assert!(!auth.is_transient());
    }

    #[test]
    fn provider_error_exposes_kind_and_message() {
        let err = ProviderError::transient(FailureKind::Overloaded, "busy");
        assert_eq!(err.kind(), FailureKind::Overloaded);
        assert_eq!(err.message(), "busy");
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn timeout_error_is_transient() {
        let err = ProviderError::timeout(Duration::from_secs(60));
        assert!(err.is_transient());
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.message().contains("60"));
    }

    #[test]
    fn alert_not_found_carries_id() {
        let err = OrchestratorError::AlertNotFound {
            alert_id: "A42".into(),
        };
        assert!(err.to_string().contains("A42"));
    }

    #[test]
    fn orchestrator_error_converts_from_anyhow() {
        let err: OrchestratorError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, OrchestratorError::Other(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ProviderError::terminal(FailureKind::Unsupported, "x"));
        assert_std_error(&OrchestratorError::validation("x"));
    }
}
