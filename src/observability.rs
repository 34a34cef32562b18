//! Observability module for correlation and tracing
//!
//! Every operator action (repay, withdraw, claim, ...) runs under its own
//! [`TraceContext`]. The approval sub-transaction gets a child span so its
//! log lines can be tied back to the action that required it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID for tracking an action across components
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

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

/// Trace identifiers for one operator action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    /// Shared by the action and all its sub-transactions
    pub trace_id: String,

    pub span_id: String,

    pub correlation_id: CorrelationId,

    pub parent_span_id: Option<String>,

    /// Action or step name ("repay", "repay/approve", ...)
    pub operation: String,

    /// Creation time (unix seconds)
    pub timestamp: i64,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: CorrelationId::new(),
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Child span for a step of this action
    pub fn child_span(&self, step: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            operation: format!("{}/{}", self.operation, step),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}
