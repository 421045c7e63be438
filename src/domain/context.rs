//! Request Context
//!
//! Metadata about the current request, carried through handler extensions
//! into logs and event metadata.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for a request, used for tracing and event enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Request ID echoed from X-Request-ID or generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Upstream trace ID if the caller supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Correlation ID for cross-service flows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// End-user identity when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the user ID
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Generate a request ID if not present, returning it
    pub fn ensure_request_id(&mut self) -> String {
        self.request_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let context = RequestContext::new()
            .with_request_id("req-1")
            .with_trace_id("trace-1")
            .with_user_id("user-1");

        assert_eq!(context.request_id.as_deref(), Some("req-1"));
        assert_eq!(context.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(context.user_id.as_deref(), Some("user-1"));
        assert!(context.correlation_id.is_none());
    }

    #[test]
    fn test_ensure_request_id() {
        let mut context = RequestContext::new();
        assert!(context.request_id.is_none());

        let id = context.ensure_request_id();
        assert_eq!(context.request_id.as_deref(), Some(id.as_str()));

        // Calling again returns the same ID
        let id2 = context.ensure_request_id();
        assert_eq!(id, id2);
    }
}
