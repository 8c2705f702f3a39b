#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_domain::{AppError, TraceId};
use tether_protocol::{Request, Subject, decode_response, encode};
use tracing::warn;

use crate::bus::MessageBus;

/// Send a request envelope and wait for the typed response.
///
/// Transport failures, timeouts and malformed replies surface as `Internal`; an error
/// body in the reply is returned as-is.
pub async fn request<T, R>(
	bus: &dyn MessageBus,
	subject: &Subject,
	trace_id: &TraceId,
	data: &T,
	timeout: Duration,
) -> Result<R, AppError>
where
	T: Serialize + Sync,
	R: DeserializeOwned,
{
	let payload = encode(&Request::new(trace_id.clone(), data)).map_err(|e| {
		warn!(%subject, %trace_id, error = %e, "failed to encode request");
		AppError::internal(format!("cannot encode request for {subject}"))
	})?;

	let raw = bus.request(subject.as_str(), payload, timeout).await.map_err(|e| {
		warn!(%subject, %trace_id, error = %e, "bus request failed");
		AppError::internal(format!("request to {subject} failed"))
	})?;

	let response = decode_response::<R>(&raw).map_err(|e| {
		warn!(%subject, %trace_id, error = %e, "failed to decode response");
		AppError::internal(format!("malformed response from {subject}"))
	})?;

	if response.trace_id != *trace_id {
		warn!(%subject, %trace_id, got = %response.trace_id, "response trace id mismatch");
		return Err(AppError::internal(format!("response from {subject} carries a foreign trace id")));
	}

	response.into_result()
}

/// Fire-and-forget envelope.
pub async fn publish<T>(bus: &dyn MessageBus, subject: &Subject, trace_id: &TraceId, data: &T) -> anyhow::Result<()>
where
	T: Serialize + Sync,
{
	let payload = encode(&Request::new(trace_id.clone(), data)).with_context(|| format!("encode event for {subject}"))?;
	bus.publish(subject.as_str(), payload).await
}
