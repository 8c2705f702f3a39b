#![forbid(unsafe_code)]

//! Typed request/response and fire-and-forget handlers over the bus.

mod client;
mod dispatcher;

#[cfg(test)]
mod dispatcher_tests;

use std::time::{Duration, Instant};

use tether_domain::TraceId;

pub use client::{publish, request};
pub use dispatcher::Dispatcher;

/// Ceiling for a single handler invocation.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request state handed to every handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
	pub trace_id: TraceId,
	pub subject: String,
	pub deadline: Instant,
}

impl RequestContext {
	pub fn new(trace_id: TraceId, subject: impl Into<String>, timeout: Duration) -> Self {
		Self {
			trace_id,
			subject: subject.into(),
			deadline: Instant::now() + timeout,
		}
	}

	/// Context for work not caused by an inbound message.
	pub fn background(subject: impl Into<String>, timeout: Duration) -> Self {
		Self::new(TraceId::generate(), subject, timeout)
	}

	/// Time left before the deadline (zero once passed).
	pub fn remaining(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}
}
