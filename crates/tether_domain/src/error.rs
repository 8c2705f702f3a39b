#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classes that cross service boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	NotFound,
	Forbidden,
	Upstream,
	Internal,
	Unauthenticated,
}

impl ErrorCode {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorCode::NotFound => "not_found",
			ErrorCode::Forbidden => "forbidden",
			ErrorCode::Upstream => "upstream",
			ErrorCode::Internal => "internal",
			ErrorCode::Unauthenticated => "unauthenticated",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Application error: a code from the shared taxonomy plus a caller-safe message.
///
/// Aggregate errors produced by multi-step operations keep every constituent
/// failure in `causes`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AppError {
	pub code: ErrorCode,
	pub message: String,
	pub causes: Vec<AppError>,
}

impl AppError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			causes: Vec::new(),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::NotFound, message)
	}

	pub fn forbidden(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Forbidden, message)
	}

	pub fn upstream(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Upstream, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Internal, message)
	}

	pub fn unauthenticated(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Unauthenticated, message)
	}

	pub fn is_not_found(&self) -> bool {
		self.code == ErrorCode::NotFound
	}

	/// Join several failures into one error. Returns `None` when there is nothing to join.
	///
	/// The joined code is shared by all causes when they agree, otherwise `Upstream`
	/// unless one of them is `Internal`.
	pub fn join(errors: Vec<AppError>) -> Option<AppError> {
		let first = errors.first()?;
		let code = if errors.iter().all(|e| e.code == first.code) {
			first.code
		} else if errors.iter().any(|e| e.code == ErrorCode::Internal) {
			ErrorCode::Internal
		} else {
			ErrorCode::Upstream
		};

		let message = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");

		Some(Self {
			code,
			message,
			causes: errors,
		})
	}

	/// Number of constituent failures (1 for a plain error).
	pub fn failure_count(&self) -> usize {
		if self.causes.is_empty() { 1 } else { self.causes.len() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn code_wire_names() {
		assert_eq!(serde_json::to_string(&ErrorCode::NotFound).unwrap(), "\"not_found\"");
		assert_eq!(
			serde_json::from_str::<ErrorCode>("\"unauthenticated\"").unwrap(),
			ErrorCode::Unauthenticated
		);
		assert_eq!(ErrorCode::Upstream.to_string(), "upstream");
	}

	#[test]
	fn join_empty_is_none() {
		assert!(AppError::join(Vec::new()).is_none());
	}

	#[test]
	fn join_keeps_every_cause() {
		let joined = AppError::join(vec![
			AppError::upstream("create stream.online failed"),
			AppError::upstream("create stream.offline failed"),
		])
		.expect("joined");

		assert_eq!(joined.code, ErrorCode::Upstream);
		assert_eq!(joined.failure_count(), 2);
		assert!(joined.message.contains("stream.online"));
		assert!(joined.message.contains("stream.offline"));
	}

	#[test]
	fn join_mixed_codes() {
		let joined = AppError::join(vec![AppError::forbidden("scope"), AppError::upstream("boom")]).unwrap();
		assert_eq!(joined.code, ErrorCode::Upstream);

		let joined = AppError::join(vec![AppError::internal("x"), AppError::upstream("y")]).unwrap();
		assert_eq!(joined.code, ErrorCode::Internal);
	}

	#[test]
	fn single_error_counts_as_one_failure() {
		assert_eq!(AppError::not_found("missing").failure_count(), 1);
	}
}
