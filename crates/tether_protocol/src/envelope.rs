#![forbid(unsafe_code)]

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether_domain::{AppError, ErrorCode, TraceId};
use thiserror::Error;

/// Default maximum encoded envelope size.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum EnvelopeError {
	#[error("envelope exceeds maximum size: len={len} max={max}")]
	TooLarge {
		len: usize,
		max: usize,
	},

	#[error("envelope json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Request envelope: `{"traceID": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<T> {
	#[serde(rename = "traceID")]
	pub trace_id: TraceId,
	pub data: T,
}

impl<T> Request<T> {
	pub fn new(trace_id: TraceId, data: T) -> Self {
		Self { trace_id, data }
	}
}

/// Error body carried by failed responses. Only code and message cross the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub code: ErrorCode,
	pub message: String,
}

impl From<&AppError> for ErrorBody {
	fn from(e: &AppError) -> Self {
		Self {
			code: e.code,
			message: e.message.clone(),
		}
	}
}

impl From<ErrorBody> for AppError {
	fn from(e: ErrorBody) -> Self {
		AppError::new(e.code, e.message)
	}
}

/// Response envelope. `trace_id` always echoes the request's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct Response<R> {
	#[serde(rename = "traceID")]
	pub trace_id: TraceId,
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<R>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorBody>,
}

impl<R> Response<R> {
	pub fn success(trace_id: TraceId, data: R) -> Self {
		Self {
			trace_id,
			ok: true,
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(trace_id: TraceId, error: &AppError) -> Self {
		Self {
			trace_id,
			ok: false,
			data: None,
			error: Some(ErrorBody::from(error)),
		}
	}

	pub fn from_result(trace_id: TraceId, result: Result<R, AppError>) -> Self {
		match result {
			Ok(data) => Self::success(trace_id, data),
			Err(e) => Self::failure(trace_id, &e),
		}
	}

	/// Convert back into a `Result` on the calling side.
	pub fn into_result(self) -> Result<R, AppError> {
		if !self.ok {
			return Err(self
				.error
				.map(AppError::from)
				.unwrap_or_else(|| AppError::internal("failed response without error body")));
		}
		self.data
			.ok_or_else(|| AppError::internal("successful response without data"))
	}
}

/// Encode any envelope to JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, EnvelopeError> {
	let buf = serde_json::to_vec(value)?;
	if buf.len() > DEFAULT_MAX_ENVELOPE_SIZE {
		return Err(EnvelopeError::TooLarge {
			len: buf.len(),
			max: DEFAULT_MAX_ENVELOPE_SIZE,
		});
	}
	Ok(Bytes::from(buf))
}

fn check_size(raw: &[u8]) -> Result<(), EnvelopeError> {
	if raw.len() > DEFAULT_MAX_ENVELOPE_SIZE {
		return Err(EnvelopeError::TooLarge {
			len: raw.len(),
			max: DEFAULT_MAX_ENVELOPE_SIZE,
		});
	}
	Ok(())
}

pub fn decode_request<T: DeserializeOwned>(raw: &[u8]) -> Result<Request<T>, EnvelopeError> {
	check_size(raw)?;
	Ok(serde_json::from_slice(raw)?)
}

pub fn decode_response<R: DeserializeOwned>(raw: &[u8]) -> Result<Response<R>, EnvelopeError> {
	check_size(raw)?;
	Ok(serde_json::from_slice(raw)?)
}

#[derive(Deserialize)]
struct TracePeek {
	#[serde(rename = "traceID")]
	trace_id: TraceId,
}

/// Extract `traceID` from a raw envelope whose payload may not match the expected type.
pub fn peek_trace_id(raw: &[u8]) -> Option<TraceId> {
	if raw.len() > DEFAULT_MAX_ENVELOPE_SIZE {
		return None;
	}
	serde_json::from_slice::<TracePeek>(raw)
		.ok()
		.map(|p| p.trace_id)
		.filter(|t| !t.is_empty())
}
