//! Per-request correlation context.
//!
//! A `RequestContext` is created at the transport boundary and threaded by
//! explicit argument through every layer. Any log record emitted while
//! serving a request must include the request id.

use std::time::{Duration, Instant};

/// Correlation data for a single request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique id for this request (uuid v4).
    pub request_id: String,
    /// Id of the request that spawned this one, if any.
    pub parent_id: Option<String>,
    /// Auth session id (anonymized token prefix), if authenticated.
    pub session_id: Option<String>,
    /// Tool being invoked, once known.
    pub tool_name: Option<String>,
    /// Absolute deadline for the request, if the transport set one.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            parent_id: None,
            session_id: None,
            tool_name: None,
            deadline: None,
        }
    }

    /// Derive a child context carrying the parent id and session.
    pub fn child(&self, tool_name: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            parent_id: Some(self.request_id.clone()),
            session_id: self.session_id.clone(),
            tool_name: Some(tool_name.into()),
            deadline: self.deadline,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time remaining before the deadline, `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
