//! Chaos hook: wraps any `Adapter` to inject latency, 5xx, and timeout
//! faults at configured rates. Off by default; only constructed when the
//! chaos flag is enabled.

use super::{Adapter, AdapterError, AdapterOutcome};
use async_trait::async_trait;
use rand::Rng;
use secrecy::SecretString;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ChaosParams {
	pub latency_pct: f64,
	pub latency_ms: u64,
	pub error_pct: f64,
	pub timeout_pct: f64,
}

impl Default for ChaosParams {
	fn default() -> Self {
		Self {
			latency_pct: 0.0,
			latency_ms: 0,
			error_pct: 0.0,
			timeout_pct: 0.0,
		}
	}
}

pub struct ChaosAdapter<A: Adapter> {
	inner: A,
	params: ChaosParams,
}

impl<A: Adapter> ChaosAdapter<A> {
	pub fn new(inner: A, params: ChaosParams) -> Self {
		Self { inner, params }
	}

	fn roll(pct: f64) -> bool {
		pct > 0.0 && rand::rng().random_range(0.0..1.0) < pct
	}
}

#[async_trait]
impl<A: Adapter> Adapter for ChaosAdapter<A> {
	async fn invoke(
		&self,
		tool: &str,
		action: &str,
		params: &serde_json::Value,
		secret: Option<&SecretString>,
		deadline: Instant,
	) -> AdapterOutcome {
		if Self::roll(self.params.timeout_pct) {
			return Err(AdapterError::Timeout);
		}
		if Self::roll(self.params.error_pct) {
			return Err(AdapterError::UpstreamServer(503));
		}
		if Self::roll(self.params.latency_pct) && self.params.latency_ms > 0 {
			tokio::time::sleep(std::time::Duration::from_millis(self.params.latency_ms)).await;
		}
		self.inner.invoke(tool, action, params, secret, deadline).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::mock::MockAdapter;

	#[tokio::test]
	async fn zero_rates_never_inject_faults() {
		let adapter = ChaosAdapter::new(MockAdapter::new(), ChaosParams::default());
		let deadline = Instant::now() + std::time::Duration::from_secs(1);
		for _ in 0..20 {
			let result = adapter
				.invoke("serpapi", "search", &serde_json::json!({}), None, deadline)
				.await;
			assert!(result.is_ok());
		}
	}

	#[tokio::test]
	async fn full_error_rate_always_fails() {
		let params = ChaosParams {
			error_pct: 1.0,
			..ChaosParams::default()
		};
		let adapter = ChaosAdapter::new(MockAdapter::new(), params);
		let deadline = Instant::now() + std::time::Duration::from_secs(1);
		let result = adapter
			.invoke("serpapi", "search", &serde_json::json!({}), None, deadline)
			.await;
		assert!(matches!(result, Err(AdapterError::UpstreamServer(503))));
	}
}
