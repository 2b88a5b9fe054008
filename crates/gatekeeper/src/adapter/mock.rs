//! Deterministic mock adapter: the same `(tool, action, params)` always
//! produces the same synthetic response, for reproducible tests and demos.

use super::{Adapter, AdapterOutcome, AdapterResponse};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

pub struct MockAdapter {
	/// Observable call counter, used by tests to assert the adapter was (or
	/// was not) invoked — e.g. that a request denied by policy never
	/// reaches `invoke`.
	calls: AtomicUsize,
}

impl Default for MockAdapter {
	fn default() -> Self {
		Self {
			calls: AtomicUsize::new(0),
		}
	}
}

impl MockAdapter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Adapter for MockAdapter {
	async fn invoke(
		&self,
		tool: &str,
		action: &str,
		params: &serde_json::Value,
		_secret: Option<&SecretString>,
		_deadline: Instant,
	) -> AdapterOutcome {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let digest = crate::token::cipher::stable_hash(
			format!("{tool}:{action}:{params}").as_bytes(),
		);
		Ok(AdapterResponse {
			status: 200,
			body: serde_json::json!({
				"tool": tool,
				"action": action,
				"echo": params,
				"mock_digest": digest,
			}),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn same_params_yield_identical_response() {
		let adapter = MockAdapter::new();
		let params = serde_json::json!({"q": "rust"});
		let deadline = Instant::now() + std::time::Duration::from_secs(1);
		let a = adapter
			.invoke("serpapi", "search", &params, None, deadline)
			.await
			.unwrap();
		let b = adapter
			.invoke("serpapi", "search", &params, None, deadline)
			.await
			.unwrap();
		assert_eq!(a.body, b.body);
		assert_eq!(adapter.call_count(), 2);
	}
}
