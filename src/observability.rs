//! Observability module for correlation and tracing

use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// Correlation ID attached to every log line of one launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Span covering one launch operation
pub fn launch_span(operation: &'static str, correlation_id: &CorrelationId, request_key: &str) -> Span {
    tracing::info_span!(
        "launch",
        operation = operation,
        correlation_id = %correlation_id,
        request_key = %short_key(request_key),
    )
}

/// First 12 hex chars of a request key, enough to grep logs
pub fn short_key(request_key: &str) -> &str {
    request_key.get(..12).unwrap_or(request_key)
}
