//! Request context
//!
//! Carries tracing metadata and the caller's cancellation signal through
//! every operation.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request context for credential operations
///
/// # Examples
///
/// ```
/// use ecr_credential::RequestContext;
/// use tokio_util::sync::CancellationToken;
///
/// let shutdown = CancellationToken::new();
/// let ctx = RequestContext::new().with_cancellation(shutdown.child_token());
/// assert!(!ctx.is_cancelled());
///
/// shutdown.cancel();
/// assert!(ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Trace ID for distributed tracing
    pub trace_id: Uuid,

    /// Timestamp of the request
    pub timestamp: DateTime<Utc>,

    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a fresh context that is never cancelled unless told to
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Tie this context to an external cancellation token (builder pattern)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set trace ID for this context (builder pattern)
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Whether the caller has cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the caller cancels
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// The underlying token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
