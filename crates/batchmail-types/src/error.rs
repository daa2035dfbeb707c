//! Error type shared by every Batchmail crate.

use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::types::JobId;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Bad campaign parameters (batch size, schedule time, template). Nothing is persisted.
	InvalidParameter(String),
	/// The delivery provider rejected or did not answer for one recipient
	ProviderFailure(String),
	/// A webhook event referenced a tracking id that is not in the status store
	UnknownTrackingId(Box<str>),
	/// A webhook event is missing its tracking id or event type
	InvalidEvent(String),
	/// The webhook payload could not be parsed at all
	BadRequest(String),
	/// Another worker already claimed the job
	SchedulerConflict(JobId),

	NotFound,
	Conflict(String),
	DbError,
	ConfigError(String),
	ServiceUnavailable(String),
	Timeout,
	Parse,
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Stable machine readable code used in HTTP error bodies
	pub fn code(&self) -> &'static str {
		match self {
			Error::InvalidParameter(_) => "INVALID_PARAMETER",
			Error::ProviderFailure(_) => "PROVIDER_FAILURE",
			Error::UnknownTrackingId(_) => "UNKNOWN_TRACKING_ID",
			Error::InvalidEvent(_) => "INVALID_EVENT",
			Error::BadRequest(_) => "BAD_REQUEST",
			Error::SchedulerConflict(_) => "SCHEDULER_CONFLICT",
			Error::NotFound => "NOT_FOUND",
			Error::Conflict(_) => "CONFLICT",
			Error::DbError => "DB_ERROR",
			Error::ConfigError(_) => "CONFIG_ERROR",
			Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
			Error::Timeout => "TIMEOUT",
			Error::Parse => "PARSE_ERROR",
			Error::Internal(_) => "INTERNAL",
			Error::Io(_) => "IO_ERROR",
		}
	}

	pub fn status_code(&self) -> StatusCode {
		match self {
			Error::InvalidParameter(_) | Error::BadRequest(_) | Error::InvalidEvent(_) => {
				StatusCode::BAD_REQUEST
			}
			Error::NotFound | Error::UnknownTrackingId(_) => StatusCode::NOT_FOUND,
			Error::Conflict(_) | Error::SchedulerConflict(_) => StatusCode::CONFLICT,
			Error::ProviderFailure(_) => StatusCode::BAD_GATEWAY,
			Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
			Error::ProviderFailure(msg) => write!(f, "provider failure: {}", msg),
			Error::UnknownTrackingId(id) => write!(f, "unknown tracking id: {}", id),
			Error::InvalidEvent(msg) => write!(f, "invalid event: {}", msg),
			Error::BadRequest(msg) => write!(f, "bad request: {}", msg),
			Error::SchedulerConflict(id) => write!(f, "job {} already claimed", id),
			Error::NotFound => write!(f, "not found"),
			Error::Conflict(msg) => write!(f, "conflict: {}", msg),
			Error::DbError => write!(f, "database error"),
			Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
			Error::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
			Error::Timeout => write!(f, "timeout"),
			Error::Parse => write!(f, "parse error"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("JSON error: {}", err);
		Self::Parse
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	code: &'static str,
	message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
	error: ErrorBody,
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!("Request failed: {}", self);
		}
		let message = match &self {
			// Don't leak internals
			Error::DbError | Error::Internal(_) | Error::Io(_) => "internal error".to_string(),
			other => other.to_string(),
		};
		(status, Json(ErrorResponse { error: ErrorBody { code: self.code(), message } }))
			.into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_codes() {
		assert_eq!(Error::InvalidParameter("x".into()).status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(Error::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(Error::NotFound.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(Error::SchedulerConflict(3).status_code(), StatusCode::CONFLICT);
		assert_eq!(Error::DbError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[test]
	fn test_display() {
		assert_eq!(
			Error::InvalidParameter("batch_size must be positive".into()).to_string(),
			"invalid parameter: batch_size must be positive"
		);
		assert_eq!(Error::UnknownTrackingId("abc".into()).to_string(), "unknown tracking id: abc");
	}
}

// vim: ts=4
