//! Tool Adapters (C8): the uniform upstream contract, in `live` and `mock`
//! modes, plus the chaos hook (C14) that can be layered over either.

pub mod chaos;
pub mod live;
pub mod mock;

use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AdapterResponse {
	pub status: u16,
	pub body: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
	#[error("network error: {0}")]
	Network(String),
	#[error("deadline exceeded")]
	Timeout,
	#[error("upstream server error: {0}")]
	UpstreamServer(u16),
	#[error("upstream client error: {0}")]
	UpstreamClient(u16),
}

pub type AdapterOutcome = Result<AdapterResponse, AdapterError>;

#[async_trait]
pub trait Adapter: Send + Sync {
	/// Invokes `(tool, action)` against the upstream. Must return `Timeout`
	/// before `deadline` elapses rather than let the caller's select race it.
	async fn invoke(
		&self,
		tool: &str,
		action: &str,
		params: &serde_json::Value,
		secret: Option<&SecretString>,
		deadline: Instant,
	) -> AdapterOutcome;
}

/// Tools that never cache and are never retried — write-side effects.
pub const WRITE_SIDE_TOOLS: &[(&str, &str)] = &[("gmail_send", "send")];

pub fn is_write_side(tool: &str, action: &str) -> bool {
	WRITE_SIDE_TOOLS.contains(&(tool, action))
}

/// Tools that require a resolved secret to invoke.
pub fn requires_secret(tool: &str) -> bool {
	!matches!(tool, "noop")
}
