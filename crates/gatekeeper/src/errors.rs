//! The error taxonomy every component error collapses into before crossing
//! the HTTP boundary.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
	#[error("bad_request")]
	BadRequest,
	#[error("invalid_token")]
	InvalidToken,
	#[error("expired")]
	Expired,
	#[error("unknown_agent")]
	UnknownAgent,
	#[error("disabled")]
	Disabled,
	#[error("policy_denied")]
	PolicyDenied,
	#[error("rate_limited")]
	RateLimited,
	#[error("idempotency_conflict")]
	IdempotencyConflict,
	#[error("validation_error")]
	ValidationError,
	#[error("breaker_open")]
	BreakerOpen,
	#[error("upstream_timeout")]
	UpstreamTimeout,
	#[error("upstream_error")]
	UpstreamError,
	#[error("secret_unavailable")]
	SecretUnavailable,
	#[error("internal")]
	Internal,
}

impl ErrorKind {
	pub fn status(self) -> StatusCode {
		use ErrorKind::*;
		match self {
			BadRequest => StatusCode::BAD_REQUEST,
			InvalidToken | Expired => StatusCode::UNAUTHORIZED,
			UnknownAgent | Disabled | PolicyDenied => StatusCode::FORBIDDEN,
			RateLimited => StatusCode::TOO_MANY_REQUESTS,
			IdempotencyConflict => StatusCode::CONFLICT,
			ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
			BreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
			UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
			UpstreamError => StatusCode::BAD_GATEWAY,
			SecretUnavailable | Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn as_str(self) -> &'static str {
		use ErrorKind::*;
		match self {
			BadRequest => "bad_request",
			InvalidToken => "invalid_token",
			Expired => "expired",
			UnknownAgent => "unknown_agent",
			Disabled => "disabled",
			PolicyDenied => "policy_denied",
			RateLimited => "rate_limited",
			IdempotencyConflict => "idempotency_conflict",
			ValidationError => "validation_error",
			BreakerOpen => "breaker_open",
			UpstreamTimeout => "upstream_timeout",
			UpstreamError => "upstream_error",
			SecretUnavailable => "secret_unavailable",
			Internal => "internal",
		}
	}
}

/// The structured error every failed request returns.
/// `detail` is only populated for `validation_error`, `internal`, and
/// `idempotency_conflict` (which carries the expected/actual body hashes);
/// every other kind surfaces a stable `reason` alone.
#[derive(Debug, Clone)]
pub struct GatewayError {
	pub kind: ErrorKind,
	pub reason: String,
	pub correlation_id: String,
	pub detail: Option<serde_json::Value>,
	pub retry_after_secs: Option<u64>,
}

impl GatewayError {
	pub fn new(kind: ErrorKind, reason: impl Into<String>, correlation_id: impl Into<String>) -> Self {
		Self {
			kind,
			reason: reason.into(),
			correlation_id: correlation_id.into(),
			detail: None,
			retry_after_secs: None,
		}
	}

	pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
		self.detail = Some(detail);
		self
	}

	pub fn with_retry_after(mut self, secs: u64) -> Self {
		self.retry_after_secs = Some(secs);
		self
	}
}

impl std::fmt::Display for GatewayError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.kind.as_str(), self.reason)
	}
}

impl std::error::Error for GatewayError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
	error: &'a str,
	reason: &'a str,
	correlation_id: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	detail: Option<&'a serde_json::Value>,
}

impl IntoResponse for GatewayError {
	fn into_response(self) -> Response {
		let status = self.kind.status();
		let detail = match self.kind {
			ErrorKind::ValidationError | ErrorKind::Internal | ErrorKind::IdempotencyConflict => {
				self.detail.as_ref()
			},
			_ => None,
		};
		let body = ErrorBody {
			error: self.kind.as_str(),
			reason: &self.reason,
			correlation_id: &self.correlation_id,
			detail,
		};
		let mut resp = (status, Json(body)).into_response();
		resp
			.headers_mut()
			.insert("x-correlation-id", self.correlation_id.parse().unwrap_or_else(|_| {
				axum::http::HeaderValue::from_static("invalid")
			}));
		if let Some(secs) = self.retry_after_secs {
			resp
				.headers_mut()
				.insert("retry-after", axum::http::HeaderValue::from(secs));
		}
		resp
	}
}
