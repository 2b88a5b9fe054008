//! Proxy Pipeline (C10): orchestrates token validation, policy, rate
//! limiting, idempotency, caching, breaker gating, and adapter invocation
//! for a single `(tool, action)` request, in that order, and wires the
//! axum router exposing the full HTTP surface.


use crate::adapter::{Adapter, AdapterError};
use crate::breaker::{CircuitBreaker, Gate};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::errors::{ErrorKind, GatewayError};
use crate::idempotency::{self, IdempotencyError, IdempotencyStore, Lookup};
use crate::metrics::{Metrics, RequestLabel, ToolActionLabel};
use crate::policy::PolicyEngine;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryExecutor;
use crate::secrets::SecretProvider;
use crate::store::{AgentStatus, RunState, Store};
use crate::telemetry::{SharedTelemetrySink, SseBroker};
use crate::token::TokenService;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;
use uuid::Uuid;

pub struct GatewayState {
	pub store: Arc<dyn Store>,
	pub tokens: Arc<TokenService>,
	pub policy: Arc<PolicyEngine>,
	pub rate_limiter: Arc<RateLimiter>,
	pub idempotency: Arc<IdempotencyStore>,
	pub cache: Arc<ResponseCache>,
	pub breaker: Arc<CircuitBreaker>,
	pub retry: Arc<RetryExecutor>,
	pub adapter: Arc<dyn Adapter>,
	pub secrets: Arc<dyn SecretProvider>,
	pub metrics: Arc<Metrics>,
	pub sse: Arc<SseBroker>,
	pub telemetry: SharedTelemetrySink,
	pub config: Config,
	pub build: gatekeeper_core::build::BuildInfo,
}

/// Full router: the agent-facing API plus the admin surface on one listener.
pub fn router(state: Arc<GatewayState>) -> Router {
	api_router(state.clone()).merge(admin_router(state))
}

/// Agent-facing surface: create-agent, generate-token, proxy-request, SSE logs.
pub fn api_router(state: Arc<GatewayState>) -> Router {
	Router::new()
		.route("/api/create-agent", post(create_agent))
		.route("/api/generate-token", post(generate_token))
		.route("/api/proxy-request", post(proxy_request))
		.route("/api/runs/:id/logs/stream", get(stream_run_logs))
		.with_state(state)
}

/// Operational surface: health, readiness, metrics. Deployers may bind this
/// to a separate, unauthenticated-but-firewalled listener.
pub fn admin_router(state: Arc<GatewayState>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/ready", get(ready))
		.route("/metrics", get(metrics))
		.with_state(state)
}

fn correlation_id(headers: &axum::http::HeaderMap) -> String {
	headers
		.get("x-correlation-id")
		.and_then(|v| v.to_str().ok())
		.map(|s| s.to_string())
		.unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ---- /api/create-agent ----

#[derive(Deserialize)]
struct CreateAgentRequest {
	name: String,
	role: String,
	creator: String,
}

#[derive(Serialize)]
struct CreateAgentResponse {
	agent_id: String,
	private_key: String,
}

async fn create_agent(
	State(state): State<Arc<GatewayState>>,
	headers: axum::http::HeaderMap,
	Json(req): Json<CreateAgentRequest>,
) -> Response {
	let cid = correlation_id(&headers);
	if req.name.trim().is_empty() || req.role.trim().is_empty() {
		return GatewayError::new(ErrorKind::BadRequest, "name and role are required", cid).into_response();
	}
	match state.tokens.register_agent(req.name, req.role, req.creator).await {
		Ok((agent, private_key)) => {
			tracing::info!(target: "audit", correlation_id = %cid, agent_id = %agent.id, "agent registered");
			Json(CreateAgentResponse {
				agent_id: agent.id,
				private_key,
			})
			.into_response()
		},
		Err(err) => {
			GatewayError::new(ErrorKind::Internal, err.to_string(), cid).into_response()
		},
	}
}

// ---- /api/generate-token ----

#[derive(Deserialize)]
struct GenerateTokenRequest {
	agent_id: String,
	tools: BTreeSet<String>,
	permissions: BTreeSet<String>,
	expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct GenerateTokenResponse {
	token: String,
}

async fn generate_token(
	State(state): State<Arc<GatewayState>>,
	headers: axum::http::HeaderMap,
	Json(req): Json<GenerateTokenRequest>,
) -> Response {
	let cid = correlation_id(&headers);
	let agent_id = req.agent_id.clone();
	match state
		.tokens
		.issue(&req.agent_id, req.tools, req.permissions, req.expires_at)
		.await
	{
		Ok(token) => {
			tracing::info!(target: "audit", correlation_id = %cid, agent_id = %agent_id, "token issued");
			Json(GenerateTokenResponse { token }).into_response()
		},
		Err(crate::token::IssueError::UnknownAgent) => {
			GatewayError::new(ErrorKind::UnknownAgent, "agent not found", cid).into_response()
		},
		Err(err @ (crate::token::IssueError::ExpiryNotInFuture | crate::token::IssueError::ExpiryTooFar)) => {
			GatewayError::new(ErrorKind::ValidationError, err.to_string(), cid).into_response()
		},
		Err(err) => GatewayError::new(ErrorKind::Internal, err.to_string(), cid).into_response(),
	}
}

// ---- /api/proxy-request ----

#[derive(Deserialize)]
struct ProxyRequestBody {
	agent_token: String,
	tool: String,
	action: String,
	#[serde(default)]
	params: serde_json::Value,
}

#[derive(Serialize)]
struct ProxyResponseBody {
	status: u16,
	body: serde_json::Value,
	run_id: String,
}

/// TTL for cacheable `(tool, action)` pairs. Write-side tools are never
/// cached regardless of what's returned here; searches default to 60s.
fn cache_ttl_for(tool: &str, action: &str) -> Duration {
	if crate::adapter::is_write_side(tool, action) {
		Duration::ZERO
	} else {
		Duration::from_secs(60)
	}
}

fn per_tool_deadline(config: &Config) -> Instant {
	Instant::now() + config.http_timeout
}

async fn proxy_request(
	State(state): State<Arc<GatewayState>>,
	headers: axum::http::HeaderMap,
	Json(req): Json<ProxyRequestBody>,
) -> Response {
	let cid = correlation_id(&headers);
	let idempotency_key = headers
		.get("idempotency-key")
		.and_then(|v| v.to_str().ok())
		.map(|s| s.to_string());

	match run_pipeline(&state, &cid, req, idempotency_key).await {
		Ok(outcome) => outcome.into_response(&cid),
		Err(err) => {
			// Logged once here, at the point the error crosses the HTTP
			// boundary, rather than re-logged at each propagation layer.
			tracing::warn!(
				target: "audit",
				correlation_id = %err.correlation_id,
				kind = err.kind.as_str(),
				reason = %err.reason,
				"proxy request failed"
			);
			err.into_response()
		},
	}
}

struct PipelineOutcome {
	status: u16,
	body: serde_json::Value,
	rotation_recommended: bool,
	expires_at: Option<chrono::DateTime<chrono::Utc>>,
	run_id: String,
}

impl PipelineOutcome {
	fn into_response(self, cid: &str) -> Response {
		let status = axum::http::StatusCode::from_u16(self.status)
			.unwrap_or(axum::http::StatusCode::OK);
		let run_id = self.run_id.clone();
		let mut resp = (status, Json(ProxyResponseBody {
			status: self.status,
			body: self.body,
			run_id: self.run_id,
		}))
		.into_response();
		resp
			.headers_mut()
			.insert("x-correlation-id", cid.parse().unwrap_or_else(|_| {
				axum::http::HeaderValue::from_static("invalid")
			}));
		if let Ok(value) = axum::http::HeaderValue::from_str(&run_id) {
			resp.headers_mut().insert("x-run-id", value);
		}
		if self.rotation_recommended {
			resp
				.headers_mut()
				.insert("x-token-rotation-recommended", axum::http::HeaderValue::from_static("true"));
		}
		if let Some(exp) = self.expires_at {
			if let Ok(value) = axum::http::HeaderValue::from_str(&exp.to_rfc3339()) {
				resp.headers_mut().insert("x-token-expires-at", value);
			}
		}
		resp
	}
}

/// Top-level entry point for a proxied request: validates the token, opens
/// the Run that roots this invocation's metrics/telemetry/SSE events, runs
/// the rest of the pipeline, then closes the Run out with a terminal state
/// and a matching SSE event.
async fn run_pipeline(
	state: &GatewayState,
	cid: &str,
	req: ProxyRequestBody,
	idempotency_key: Option<String>,
) -> Result<PipelineOutcome, GatewayError> {
	let start = Instant::now();

	// 2. Validate token.
	let validated = state.tokens.validate(&req.agent_token).await.map_err(|e| {
		use crate::token::ValidateErrorKind::*;
		let kind = match e {
			Malformed | InvalidSignature | InvalidToken => ErrorKind::InvalidToken,
			Expired => ErrorKind::Expired,
			UnknownAgent => ErrorKind::UnknownAgent,
			Disabled => ErrorKind::Disabled,
		};
		GatewayError::new(kind, e.to_string(), cid)
	})?;
	let agent_id = validated.payload.agent_id.clone();

	// Run (C13 correlation root): created once the caller is known so every
	// later metric, telemetry span, and SSE event can be tied back to it via
	// `/api/runs/:id/logs/stream`.
	let run = state
		.store
		.create_run(&agent_id)
		.await
		.map_err(|e| GatewayError::new(ErrorKind::Internal, e.to_string(), cid))?;
	let _ = state.store.transition_run(&run.id, RunState::Running).await;
	state
		.sse
		.publish(&run.id, "run.started", serde_json::json!({"tool": req.tool, "action": req.action}))
		.await;

	let result = run_pipeline_steps(state, cid, &run.id, &agent_id, &validated, req, idempotency_key, start).await;

	match &result {
		Ok(outcome) => {
			let _ = state.store.transition_run(&run.id, RunState::Complete).await;
			state
				.sse
				.publish(&run.id, "run.complete", serde_json::json!({"status": outcome.status}))
				.await;
		},
		Err(err) => {
			let _ = state.store.transition_run(&run.id, RunState::Failed).await;
			state
				.sse
				.publish(&run.id, "run.failed", serde_json::json!({"kind": err.kind.as_str(), "reason": err.reason}))
				.await;
		},
	}

	result
}

/// Steps 3-14: everything after the Run is open and before it is closed out.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline_steps(
	state: &GatewayState,
	cid: &str,
	run_id: &str,
	agent_id: &str,
	validated: &crate::token::ValidatedToken,
	req: ProxyRequestBody,
	idempotency_key: Option<String>,
	start: Instant,
) -> Result<PipelineOutcome, GatewayError> {
	// 3. Resolve agent; check status.
	let agent = state
		.store
		.get_agent(agent_id)
		.await
		.map_err(|_| GatewayError::new(ErrorKind::UnknownAgent, "agent not found", cid))?;
	if !matches!(agent.status, AgentStatus::Active) {
		return Err(GatewayError::new(ErrorKind::Disabled, "agent is disabled", cid));
	}

	// 4. Policy evaluate.
	let decision = state
		.policy
		.evaluate(agent_id, &req.tool, &req.action, &req.params)
		.await
		.map_err(|e| GatewayError::new(ErrorKind::Internal, e.to_string(), cid))?;
	if !decision.allow {
		let reason = decision.reason.expect("deny always carries a reason");
		state.metrics.policy_denials_total.get_or_create(&crate::metrics::PolicyDenialLabel {
			tool: req.tool.clone(),
			action: req.action.clone(),
			reason: reason.as_str().to_string(),
		}).inc();
		return Err(GatewayError::new(ErrorKind::PolicyDenied, reason.as_str(), cid));
	}

	// 5. Rate limit.
	let rate_decision = state.rate_limiter.check(agent_id);
	if !rate_decision.allowed {
		state.metrics.rate_limit_hits_total.get_or_create(&crate::metrics::AgentLabel {
			agent: agent_id.to_string(),
		}).inc();
		return Err(
			GatewayError::new(ErrorKind::RateLimited, "rate limit exceeded", cid)
				.with_retry_after(rate_decision.retry_after_secs),
		);
	}

	// 6. Idempotency check.
	let body_hash = idempotency::body_hash(&req.params);
	if let Some(key) = &idempotency_key {
		match state.idempotency.lookup(key, &body_hash) {
			Ok(Lookup::Hit(record)) => {
				return Ok(PipelineOutcome {
					status: 200,
					body: record.body,
					rotation_recommended: validated.rotation_recommended,
					expires_at: Some(validated.payload.expires_at),
					run_id: run_id.to_string(),
				});
			},
			Ok(Lookup::Miss) => {},
			Err(IdempotencyError::InvalidKey) => {
				return Err(GatewayError::new(ErrorKind::ValidationError, "idempotency key must be a uuid", cid));
			},
			Err(IdempotencyError::Conflict { expected_body_hash }) => {
				return Err(GatewayError::new(
					ErrorKind::IdempotencyConflict,
					"idempotency key reused with a different body",
					cid,
				)
				.with_detail(serde_json::json!({
					"expected_body_hash": expected_body_hash,
					"actual_body_hash": body_hash,
				})));
			},
		}
	}

	// 7. Cache lookup. Cacheable misses go through `get_or_populate` so a
	// burst of concurrent requests for the same cold key share one upstream
	// call instead of each invoking the adapter (single-flight, §5).
	let cacheable = !crate::adapter::is_write_side(&req.tool, &req.action);
	let cache_key = ResponseCache::key(agent_id, &req.tool, &req.action, &req.params);
	if cacheable {
		if state.cache.get(&cache_key).is_some() {
			state.metrics.cache_hits_total.inc();
		} else {
			state.metrics.cache_misses_total.inc();
		}
	}

	let ttl = cache_ttl_for(&req.tool, &req.action);
	let call = UpstreamCall {
		breaker: state.breaker.clone(),
		secrets: state.secrets.clone(),
		telemetry: state.telemetry.clone(),
		sse: state.sse.clone(),
		retry: state.retry.clone(),
		adapter: state.adapter.clone(),
		config: state.config.clone(),
		cid: cid.to_string(),
		run_id: run_id.to_string(),
		tool: req.tool.clone(),
		action: req.action.clone(),
		params: req.params.clone(),
	};
	let upstream_result = if cacheable {
		state
			.cache
			.get_or_populate(&cache_key, ttl, move || invoke_upstream(call))
			.await
			.0
	} else {
		invoke_upstream(call).await
	};
	let entry = match upstream_result {
		Ok(entry) => entry,
		Err(err) => {
			record_request_metrics(&state.metrics, &req.tool, &req.action, err.kind.status().as_u16(), start);
			return Err(err);
		},
	};

	// 13. Idempotency store.
	if let Some(key) = &idempotency_key {
		state.idempotency.store(key, entry.status, entry.body.clone(), body_hash);
	}

	// 14. Emit request metrics.
	record_request_metrics(&state.metrics, &req.tool, &req.action, entry.status, start);

	Ok(PipelineOutcome {
		status: if idempotency_key.is_some() { 201 } else { entry.status },
		body: entry.body,
		rotation_recommended: validated.rotation_recommended,
		expires_at: Some(validated.payload.expires_at),
		run_id: run_id.to_string(),
	})
}

/// Everything steps 8-11 need, captured by value so the call can run inside
/// an owned `'static` closure — required to pass it through the cache's
/// single-flight latch, which may outlive the request that initiated it if
/// a later waiter is still attached after the winner's caller moves on.
struct UpstreamCall {
	breaker: Arc<CircuitBreaker>,
	secrets: Arc<dyn SecretProvider>,
	telemetry: SharedTelemetrySink,
	sse: Arc<SseBroker>,
	retry: Arc<RetryExecutor>,
	adapter: Arc<dyn Adapter>,
	config: Config,
	cid: String,
	run_id: String,
	tool: String,
	action: String,
	params: serde_json::Value,
}

/// Steps 8-11: breaker gate, secret resolution, retried adapter invocation,
/// and the breaker outcome update. Shared by the cached and uncached paths;
/// when cacheable, runs behind the cache's single-flight latch so only one
/// waiter per cold key actually reaches the adapter.
async fn invoke_upstream(call: UpstreamCall) -> Result<crate::cache::CacheEntry, GatewayError> {
	let UpstreamCall {
		breaker,
		secrets,
		telemetry,
		sse,
		retry,
		adapter,
		config,
		cid,
		run_id,
		tool,
		action,
		params,
	} = call;

	// 8. Breaker gate.
	if breaker.gate(&tool) == Gate::FastFail {
		return Err(GatewayError::new(ErrorKind::BreakerOpen, "circuit breaker open", cid.as_str()));
	}

	// 9. Resolve secret if required.
	let secret = if crate::adapter::requires_secret(&tool) {
		let key = format!("{tool}.api_key");
		match secrets.resolve(&key) {
			Ok(secret) => Some(secret),
			Err(_) => {
				// The gate above may have admitted a half-open probe; bailing
				// out here without recording an outcome would leak that slot.
				breaker.release_probe(&tool);
				return Err(GatewayError::new(ErrorKind::SecretUnavailable, "credential not resolvable", cid.as_str()));
			},
		}
	} else {
		None
	};

	telemetry.record_span(&cid, "adapter.invoke", &serde_json::json!({"tool": tool, "action": action}));
	sse.publish(&run_id, "adapter.invoke", serde_json::json!({"tool": tool, "action": action})).await;

	// 10. Invoke adapter via retry executor.
	let deadline = per_tool_deadline(&config);
	let outcome = retry
		.run(&tool, &action, deadline, || {
			let adapter = adapter.clone();
			let tool = tool.clone();
			let action = action.clone();
			let params = params.clone();
			let secret = secret.clone();
			async move { adapter.invoke(&tool, &action, &params, secret.as_ref(), deadline).await }
		})
		.await;

	telemetry.record_event(&cid, "adapter.result", &serde_json::json!({"ok": outcome.is_ok()}));
	sse.publish(&run_id, "adapter.result", serde_json::json!({"ok": outcome.is_ok()})).await;

	// 11. Update breaker with outcome.
	match &outcome {
		Ok(_) => breaker.record_success(&tool),
		Err(AdapterError::UpstreamClient(_)) => {},
		Err(_) => breaker.record_failure(&tool),
	}

	match outcome {
		Ok(response) => Ok(crate::cache::CacheEntry {
			status: response.status,
			body: response.body,
			headers_subset: Default::default(),
			stored_at: Instant::now(),
			ttl: Duration::ZERO,
		}),
		Err(err) => Err(adapter_error_to_gateway(err, cid.as_str())),
	}
}

fn record_request_metrics(metrics: &Metrics, tool: &str, action: &str, status: u16, start: Instant) {
	metrics.requests_total.get_or_create(&RequestLabel {
		tool: tool.to_string(),
		action: action.to_string(),
		code: status.to_string(),
	}).inc();
	metrics
		.request_duration_ms
		.get_or_create(&ToolActionLabel {
			tool: tool.to_string(),
			action: action.to_string(),
		})
		.observe(start.elapsed().as_secs_f64() * 1000.0);
}

fn adapter_error_to_gateway(err: AdapterError, cid: &str) -> GatewayError {
	match err {
		AdapterError::Timeout => GatewayError::new(ErrorKind::UpstreamTimeout, "deadline exceeded", cid),
		AdapterError::Network(msg) => GatewayError::new(ErrorKind::UpstreamError, msg, cid),
		AdapterError::UpstreamServer(code) => {
			GatewayError::new(ErrorKind::UpstreamError, format!("upstream returned {code}"), cid)
		},
		AdapterError::UpstreamClient(code) => {
			GatewayError::new(ErrorKind::UpstreamError, format!("upstream returned {code}"), cid)
		},
	}
}

// ---- /health, /ready, /metrics ----

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"ok": true,
		"version": state.build.version,
		"time": chrono::Utc::now(),
	}))
}

async fn ready(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
	let store_reachable = state.store.get_agent("__readiness_probe__").await.is_err();
	Json(serde_json::json!({
		"ok": store_reachable,
		"store_reachable": store_reachable,
		"signing_secret_loaded": true,
		"flags": {
			"cache": state.config.flags.cache,
			"retry": state.config.flags.retry,
			"breakers": state.config.flags.breakers,
		},
	}))
}

async fn metrics(State(state): State<Arc<GatewayState>>) -> String {
	state.metrics.encode_text()
}

// ---- /api/runs/:id/logs/stream ----

#[derive(Deserialize)]
struct StreamQuery {
	#[serde(rename = "lastEventId")]
	last_event_id: Option<u64>,
}

async fn stream_run_logs(
	State(state): State<Arc<GatewayState>>,
	Path(run_id): Path<String>,
	Query(query): Query<StreamQuery>,
	headers: axum::http::HeaderMap,
) -> Response {
	let last_event_id = headers
		.get("last-event-id")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse().ok())
		.or(query.last_event_id);

	let subscription = match state.sse.subscribe(&run_id, last_event_id).await {
		Ok(sub) => sub,
		Err(_) => {
			return GatewayError::new(
				ErrorKind::BadRequest,
				"run has too many concurrent subscribers",
				Uuid::new_v4().to_string(),
			)
			.into_response();
		},
	};

	let replay = tokio_stream::iter(subscription.replay);
	let live = tokio_stream::wrappers::BroadcastStream::new(subscription.receiver)
		.filter_map(|item| item.ok());
	let combined = replay.chain(live).map(|event| {
		Ok::<_, std::convert::Infallible>(
			Event::default()
				.id(event.id.to_string())
				.event(event.event.clone())
				.json_data(event.data.clone())
				.unwrap_or_else(|_| Event::default().data("serialization_error")),
		)
	});
	// The guard releases this run's subscriber slot once the SSE stream is
	// dropped, i.e. when the client disconnects.
	let guarded = crate::telemetry::GuardedStream::new(combined, subscription.guard);

	Sse::new(guarded).keep_alive(KeepAlive::new().interval(crate::telemetry::HEARTBEAT_INTERVAL)).into_response()
}
