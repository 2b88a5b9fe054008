use axum::body::Body;
use axum::http::{Request, StatusCode};
use gatekeeper::adapter::mock::MockAdapter;
use gatekeeper::breaker::{CircuitBreaker, Params as BreakerParams};
use gatekeeper::cache::ResponseCache;
use gatekeeper::config::{Config, FeatureFlags, UpstreamMode};
use gatekeeper::idempotency::IdempotencyStore;
use gatekeeper::metrics::Metrics;
use gatekeeper::policy::PolicyEngine;
use gatekeeper::ratelimit::RateLimiter;
use gatekeeper::retry::{Params as RetryParams, RetryExecutor};
use gatekeeper::secrets::{SecretError, SecretProvider};
use gatekeeper::store::memory::MemoryStore;
use gatekeeper::store::{Policy, PolicyGuards, PolicySpec, Store};
use gatekeeper::telemetry::{SseBroker, TracingTelemetrySink};
use gatekeeper::token::cipher;
use gatekeeper::token::TokenService;
use gatekeeper::{api_router, GatewayState};
use http_body_util::BodyExt;
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::sync::Arc;
use tower::ServiceExt;

struct AlwaysSecretProvider;

impl SecretProvider for AlwaysSecretProvider {
	fn resolve(&self, _key: &str) -> Result<SecretString, SecretError> {
		Ok(SecretString::from("test-secret"))
	}
}

fn test_config() -> Config {
	Config {
		signing_secret: SecretString::from("secret"),
		signing_secret_previous: None,
		gateway_private_key_pem: SecretString::from(""),
		upstream_mode: UpstreamMode::Mock,
		flags: FeatureFlags {
			cache: true,
			retry: true,
			breakers: true,
			chaos: false,
		},
		http_timeout: std::time::Duration::from_secs(6),
		default_timezone: "UTC".to_string(),
		max_token_lifetime: std::time::Duration::from_secs(3600),
		rotation_threshold: std::time::Duration::from_secs(300),
		rate_limit_per_minute: 1000,
		chaos: gatekeeper::adapter::chaos::ChaosParams::default(),
	}
}

async fn build_app() -> (axum::Router, String) {
	let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
	let metrics = Arc::new(Metrics::new());
	let config = test_config();
	let kp = cipher::generate_keypair().unwrap();

	let tokens = Arc::new(TokenService::new(
		store.clone(),
		metrics.clone(),
		kp.private_key,
		config.signing_secret.clone(),
		config.signing_secret_previous.clone(),
		config.max_token_lifetime,
		config.rotation_threshold,
	));

	let (agent, _) = tokens
		.register_agent("agent-a".to_string(), "research".to_string(), "tester".to_string())
		.await
		.unwrap();
	store
		.put_policy(Policy {
			id: "p1".to_string(),
			agent_id: agent.id.clone(),
			name: "default".to_string(),
			spec: PolicySpec {
				scopes: BTreeSet::from(["serpapi:search".to_string()]),
				intent: None,
				guards: PolicyGuards::default(),
			},
			spec_hash: "h".to_string(),
			active: true,
			created_at: chrono::Utc::now(),
			updated_at: chrono::Utc::now(),
		})
		.await
		.unwrap();

	let breaker = Arc::new(CircuitBreaker::new(true, BreakerParams::default(), metrics.clone()));
	let state = Arc::new(GatewayState {
		store: store.clone(),
		tokens,
		policy: Arc::new(PolicyEngine::new(store.clone())),
		rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
		idempotency: Arc::new(IdempotencyStore::new(std::time::Duration::from_secs(86400), metrics.clone())),
		cache: Arc::new(ResponseCache::new(10_000, config.flags.cache)),
		breaker,
		retry: Arc::new(RetryExecutor::new(config.flags.retry, RetryParams::default(), metrics.clone())),
		adapter: Arc::new(MockAdapter::new()),
		secrets: Arc::new(AlwaysSecretProvider),
		metrics,
		sse: Arc::new(SseBroker::new()),
		telemetry: Arc::new(TracingTelemetrySink),
		config,
		build: gatekeeper_core::build::BuildInfo::current(),
	});

	(api_router(state), agent.id)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_agent_then_generate_token_then_proxy_over_http() {
	let (app, _seeded_agent_id) = build_app().await;

	let create_req = Request::builder()
		.method("POST")
		.uri("/api/create-agent")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::json!({"name": "agent-b", "role": "research", "creator": "tester"}).to_string(),
		))
		.unwrap();
	let response = app.clone().oneshot(create_req).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let created = json_body(response).await;
	let agent_id = created["agent_id"].as_str().unwrap().to_string();

	// No policy exists for agent-b, so a generated token can still be
	// issued, but proxying through it should be denied at the policy step.
	let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
	let token_req = Request::builder()
		.method("POST")
		.uri("/api/generate-token")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::json!({
				"agent_id": agent_id,
				"tools": ["serpapi"],
				"permissions": ["search"],
				"expires_at": expires_at,
			})
			.to_string(),
		))
		.unwrap();
	let response = app.clone().oneshot(token_req).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let issued = json_body(response).await;
	let token = issued["token"].as_str().unwrap().to_string();

	let proxy_req = Request::builder()
		.method("POST")
		.uri("/api/proxy-request")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::json!({
				"agent_token": token,
				"tool": "serpapi",
				"action": "search",
				"params": {"q": "rust"},
			})
			.to_string(),
		))
		.unwrap();
	let response = app.oneshot(proxy_req).await.unwrap();
	assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn proxy_request_with_valid_policy_succeeds_over_http() {
	let (app, agent_id) = build_app().await;

	let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
	let token_req = Request::builder()
		.method("POST")
		.uri("/api/generate-token")
		.header("content-type", "application/json")
		.body(Body::from(
			serde_json::json!({
				"agent_id": agent_id,
				"tools": ["serpapi"],
				"permissions": ["search"],
				"expires_at": expires_at,
			})
			.to_string(),
		))
		.unwrap();
	let response = app.clone().oneshot(token_req).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let issued = json_body(response).await;
	let token = issued["token"].as_str().unwrap().to_string();

	let proxy_body = serde_json::json!({
		"agent_token": token,
		"tool": "serpapi",
		"action": "search",
		"params": {"q": "rust"},
	})
	.to_string();

	let first = Request::builder()
		.method("POST")
		.uri("/api/proxy-request")
		.header("content-type", "application/json")
		.body(Body::from(proxy_body.clone()))
		.unwrap();
	let response = app.clone().oneshot(first).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	// Repeat the identical request; the pipeline's cache should serve it
	// without a second adapter call, same status.
	let second = Request::builder()
		.method("POST")
		.uri("/api/proxy-request")
		.header("content-type", "application/json")
		.body(Body::from(proxy_body))
		.unwrap();
	let response = app.oneshot(second).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_json_body_is_rejected() {
	// Invalid JSON syntax never reaches the handler: axum's `Json`
	// extractor rejects it up front with 400, before `GatewayError`'s own
	// `bad_request`/`validation_error` split ever applies.
	let (app, _seeded_agent_id) = build_app().await;
	let req = Request::builder()
		.method("POST")
		.uri("/api/proxy-request")
		.header("content-type", "application/json")
		.body(Body::from("not json"))
		.unwrap();
	let response = app.oneshot(req).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
