// Boundary between the engine and the external tools that do the work

use thiserror::Error;

/// Failure reported by a capability invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal failure: {0}")]
    Fatal(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("unknown capability '{0}'")]
    Unknown(String),

    #[error("capability '{0}' is disabled")]
    Disabled(String),
}

impl CapabilityError {
    /// Whether the runner may spend a retry on this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
            Self::Timeout(_) => "timeout",
            Self::Unknown(_) => "unknown",
            Self::Disabled(_) => "disabled",
        }
    }
}

/// Invokes a named capability. Implementations own transport, auth and any
/// failure handling of their own; the engine only sees the result.
#[async_trait::async_trait]
pub trait CapabilityInvoker: Send + Sync {
    async fn invoke(
        &self,
        capability: &str,
        action: &str,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, CapabilityError>;
}
