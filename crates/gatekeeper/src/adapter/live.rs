//! Live adapter: real upstream calls over `reqwest`, honoring the caller's
//! deadline instead of relying on a client-wide timeout.

use super::{Adapter, AdapterError, AdapterOutcome, AdapterResponse};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Instant;

pub struct LiveAdapter {
	client: reqwest::Client,
	base_urls: std::collections::HashMap<String, String>,
}

impl LiveAdapter {
	pub fn new(client: reqwest::Client, base_urls: std::collections::HashMap<String, String>) -> Self {
		Self { client, base_urls }
	}

	fn endpoint(&self, tool: &str, action: &str) -> String {
		let base = self
			.base_urls
			.get(tool)
			.cloned()
			.unwrap_or_else(|| format!("https://{tool}.invalid"));
		format!("{base}/{action}")
	}
}

#[async_trait]
impl Adapter for LiveAdapter {
	async fn invoke(
		&self,
		tool: &str,
		action: &str,
		params: &serde_json::Value,
		secret: Option<&SecretString>,
		deadline: Instant,
	) -> AdapterOutcome {
		let remaining = deadline.saturating_duration_since(Instant::now());
		if remaining.is_zero() {
			return Err(AdapterError::Timeout);
		}

		let mut req = self
			.client
			.post(self.endpoint(tool, action))
			.json(params)
			.timeout(remaining);
		if let Some(secret) = secret {
			req = req.bearer_auth(secret.expose_secret());
		}

		let response = match req.send().await {
			Ok(response) => response,
			Err(err) if err.is_timeout() => return Err(AdapterError::Timeout),
			Err(err) => return Err(AdapterError::Network(err.to_string())),
		};

		let status = response.status();
		let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

		if status.is_server_error() {
			return Err(AdapterError::UpstreamServer(status.as_u16()));
		}
		if status.is_client_error() {
			return Err(AdapterError::UpstreamClient(status.as_u16()));
		}

		Ok(AdapterResponse {
			status: status.as_u16(),
			body,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn adapter(base: &str) -> LiveAdapter {
		let mut bases = std::collections::HashMap::new();
		bases.insert("serpapi".to_string(), base.to_string());
		LiveAdapter::new(reqwest::Client::new(), bases)
	}

	#[tokio::test]
	async fn successful_call_returns_body() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/search"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
			.mount(&server)
			.await;

		let adapter = adapter(&server.uri());
		let deadline = Instant::now() + std::time::Duration::from_secs(5);
		let result = adapter
			.invoke("serpapi", "search", &serde_json::json!({"q": "rust"}), None, deadline)
			.await
			.unwrap();
		assert_eq!(result.status, 200);
		assert_eq!(result.body, serde_json::json!({"ok": true}));
	}

	#[tokio::test]
	async fn server_error_is_mapped() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/search"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let adapter = adapter(&server.uri());
		let deadline = Instant::now() + std::time::Duration::from_secs(5);
		let err = adapter
			.invoke("serpapi", "search", &serde_json::json!({}), None, deadline)
			.await
			.unwrap_err();
		assert!(matches!(err, AdapterError::UpstreamServer(503)));
	}

	#[tokio::test]
	async fn past_deadline_fails_fast_without_a_call() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/search"))
			.respond_with(ResponseTemplate::new(200))
			.expect(0)
			.mount(&server)
			.await;

		let adapter = adapter(&server.uri());
		let deadline = Instant::now() - std::time::Duration::from_secs(1);
		let err = adapter
			.invoke("serpapi", "search", &serde_json::json!({}), None, deadline)
			.await
			.unwrap_err();
		assert!(matches!(err, AdapterError::Timeout));
	}
}
