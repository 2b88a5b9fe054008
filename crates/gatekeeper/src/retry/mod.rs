//! Retry Executor (C7): bounded retries with exponential backoff + jitter,
//! restricted to an explicit idempotent-action whitelist.

use crate::adapter::{AdapterError, AdapterOutcome};
use crate::metrics::{Metrics, RetryLabel};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `(tool, action)` pairs safe to retry. `gmail_send` (and any write-side
/// action) is never in this list.
const IDEMPOTENT_ACTIONS: &[(&str, &str)] = &[
	("serpapi", "search"),
	("http_fetch", "get"),
	("llm_chat", "complete"),
];

pub fn is_idempotent(tool: &str, action: &str) -> bool {
	IDEMPOTENT_ACTIONS.contains(&(tool, action))
}

pub struct Params {
	pub max_attempts: u32,
	pub base: Duration,
}

impl Default for Params {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base: Duration::from_millis(100),
		}
	}
}

pub struct RetryExecutor {
	enabled: bool,
	params: Params,
	metrics: Arc<Metrics>,
}

fn is_retryable(err: &AdapterError) -> bool {
	matches!(
		err,
		AdapterError::Timeout | AdapterError::Network(_) | AdapterError::UpstreamServer(_)
	)
}

impl RetryExecutor {
	pub fn new(enabled: bool, params: Params, metrics: Arc<Metrics>) -> Self {
		Self {
			enabled,
			params,
			metrics,
		}
	}

	/// Runs `call` (an adapter invocation) with bounded retries if
	/// `(tool, action)` is idempotent and the overall `deadline` allows.
	/// Never retries a non-idempotent action, regardless of the failure.
	pub async fn run<F, Fut>(
		&self,
		tool: &str,
		action: &str,
		deadline: Instant,
		mut call: F,
	) -> AdapterOutcome
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = AdapterOutcome>,
	{
		let max_attempts = if self.enabled && is_idempotent(tool, action) {
			self.params.max_attempts
		} else {
			1
		};

		let mut attempt = 0u32;
		loop {
			attempt += 1;
			let outcome = call().await;
			let err = match &outcome {
				Ok(_) => {
					self.record(tool, action, "success");
					return outcome;
				},
				Err(e) => e.clone(),
			};

			let can_retry = attempt < max_attempts && is_retryable(&err) && Instant::now() < deadline;
			if !can_retry {
				self.record(tool, action, "failure");
				return outcome;
			}
			self.record(tool, action, "retried");

			let backoff = self.params.base * 2u32.pow(attempt.saturating_sub(1));
			let jitter = rand::rng().random_range(Duration::ZERO..=self.params.base);
			let wait = backoff + jitter;
			let remaining = deadline.saturating_duration_since(Instant::now());
			tokio::time::sleep(wait.min(remaining)).await;
		}
	}

	fn record(&self, tool: &str, action: &str, outcome: &str) {
		self.metrics.retries_total.get_or_create(&RetryLabel {
			tool: tool.to_string(),
			action: action.to_string(),
			outcome: outcome.to_string(),
		}).inc();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn retries_idempotent_action_on_timeout() {
		let executor = RetryExecutor::new(
			true,
			Params {
				max_attempts: 3,
				base: Duration::from_millis(1),
			},
			Arc::new(Metrics::new()),
		);
		let calls = AtomicUsize::new(0);
		let deadline = Instant::now() + Duration::from_secs(5);
		let outcome = executor
			.run("serpapi", "search", deadline, || async {
				let n = calls.fetch_add(1, Ordering::SeqCst);
				if n < 2 {
					Err(AdapterError::Timeout)
				} else {
					Ok(crate::adapter::AdapterResponse {
						status: 200,
						body: serde_json::json!({}),
					})
				}
			})
			.await;
		assert!(outcome.is_ok());
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn never_retries_non_idempotent_action() {
		let executor = RetryExecutor::new(true, Params::default(), Arc::new(Metrics::new()));
		let calls = AtomicUsize::new(0);
		let deadline = Instant::now() + Duration::from_secs(5);
		let outcome = executor
			.run("gmail_send", "send", deadline, || async {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(AdapterError::Timeout)
			})
			.await;
		assert!(outcome.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn does_not_retry_client_errors() {
		let executor = RetryExecutor::new(true, Params::default(), Arc::new(Metrics::new()));
		let calls = AtomicUsize::new(0);
		let deadline = Instant::now() + Duration::from_secs(5);
		let outcome = executor
			.run("serpapi", "search", deadline, || async {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(AdapterError::UpstreamClient(400))
			})
			.await;
		assert!(outcome.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
