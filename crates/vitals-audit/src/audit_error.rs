use thiserror::Error;

use crate::audit_types::Metric;

/// Fatal conditions raised while preparing or running an audit.
///
/// Threshold violations are not errors; they are reported through
/// [`crate::AuditOutcome`].
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid target url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid threshold for {metric}: {value} (must be finite and non-negative)")]
    InvalidThreshold { metric: Metric, value: f64 },
    #[error("invalid audit configuration: {0}")]
    InvalidConfig(String),
    #[error("rendering engine '{engine}' failed to launch: {message}")]
    Launch { engine: String, message: String },
    #[error("audit run failed: {0}")]
    Audit(String),
    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },
    #[error("malformed audit report: {0}")]
    MalformedReport(String),
}

impl AuditError {
    pub(crate) fn launch(engine: &str, message: impl Into<String>) -> Self {
        Self::Launch {
            engine: engine.to_string(),
            message: message.into(),
        }
    }

    /// Stable label used by fixtures and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } | Self::InvalidThreshold { .. } | Self::InvalidConfig(_) => {
                "invalid_input"
            }
            Self::Launch { .. } => "launch",
            Self::Audit(_) => "audit",
            Self::Timeout { .. } => "timeout",
            Self::MalformedReport(_) => "malformed_report",
        }
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
