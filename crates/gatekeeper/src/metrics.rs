//! Metrics Registry (C12): process-wide counters/histograms/gauges with
//! text exposition on `/metrics`. Pre-registered label sets and atomic
//! counters keep the hot path allocation-free.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

const LATENCY_BUCKETS_MS: [f64; 10] = [
	5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AgentLabel {
	pub agent: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabel {
	pub tool: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolActionLabel {
	pub tool: String,
	pub action: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PolicyDenialLabel {
	pub tool: String,
	pub action: String,
	pub reason: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabel {
	pub tool: String,
	pub action: String,
	pub code: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RetryLabel {
	pub tool: String,
	pub action: String,
	pub outcome: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum BreakerStateValue {
	Closed,
	HalfOpen,
	Open,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BreakerTransitionLabel {
	pub tool: String,
	pub to: BreakerStateValue,
}

pub struct Metrics {
	registry: Registry,

	pub token_generations_total: Family<AgentLabel, Counter>,
	pub token_validations_total: Counter,
	pub token_expirations_total: Counter,
	pub token_rotation_hints_total: Counter,

	pub policy_denials_total: Family<PolicyDenialLabel, Counter>,

	pub rate_limit_hits_total: Family<AgentLabel, Counter>,

	pub cache_hits_total: Counter,
	pub cache_misses_total: Counter,

	pub breaker_state: Family<ToolLabel, Gauge>,
	pub breaker_fastfail_total: Family<ToolLabel, Counter>,
	pub breaker_transitions_total: Family<BreakerTransitionLabel, Counter>,

	pub retries_total: Family<RetryLabel, Counter>,

	pub requests_total: Family<RequestLabel, Counter>,
	pub request_duration_ms: Family<ToolActionLabel, Histogram>,

	pub idempotency_conflicts_total: Counter,
}

impl Metrics {
	pub fn new() -> Self {
		let mut registry = Registry::default();

		macro_rules! register {
			($name:literal, $help:literal, $metric:expr) => {{
				let m = $metric;
				registry.register($name, $help, m.clone());
				m
			}};
		}

		let token_generations_total =
			register!("token_generations_total", "token issuances", Family::default());
		let token_validations_total =
			register!("token_validations_total", "token validations", Counter::default());
		let token_expirations_total =
			register!("token_expirations_total", "expired tokens rejected", Counter::default());
		let token_rotation_hints_total = register!(
			"token_rotation_hints_total",
			"rotation hints issued",
			Counter::default()
		);

		let policy_denials_total =
			register!("policy_denials_total", "policy denials by reason", Family::default());

		let rate_limit_hits_total =
			register!("rate_limit_hits_total", "rate limit rejections", Family::default());

		let cache_hits_total = register!("cache_hits_total", "cache hits", Counter::default());
		let cache_misses_total = register!("cache_misses_total", "cache misses", Counter::default());

		let breaker_state = register!(
			"breaker_state",
			"0=closed 1=half_open 2=open",
			Family::default()
		);
		let breaker_fastfail_total = register!(
			"breaker_fastfail_total",
			"requests fast-failed by an open breaker",
			Family::default()
		);
		let breaker_transitions_total = register!(
			"breaker_transitions_total",
			"breaker state transitions",
			Family::default()
		);

		let retries_total = register!("retries_total", "adapter retry attempts", Family::default());

		let requests_total = register!("requests_total", "proxy requests", Family::default());
		let request_duration_ms = register!(
			"request_duration_ms",
			"proxy request latency",
			Family::<ToolActionLabel, Histogram>::new_with_constructor(|| {
				Histogram::new(LATENCY_BUCKETS_MS.into_iter())
			})
		);

		let idempotency_conflicts_total = register!(
			"idempotency_conflicts_total",
			"idempotency key conflicts",
			Counter::default()
		);

		Self {
			registry,
			token_generations_total,
			token_validations_total,
			token_expirations_total,
			token_rotation_hints_total,
			policy_denials_total,
			rate_limit_hits_total,
			cache_hits_total,
			cache_misses_total,
			breaker_state,
			breaker_fastfail_total,
			breaker_transitions_total,
			retries_total,
			requests_total,
			request_duration_ms,
			idempotency_conflicts_total,
		}
	}

	pub fn record_breaker_gauge(&self, tool: &str, value: BreakerStateValue) {
		let numeric = match value {
			BreakerStateValue::Closed => 0,
			BreakerStateValue::HalfOpen => 1,
			BreakerStateValue::Open => 2,
		};
		self
			.breaker_state
			.get_or_create(&ToolLabel { tool: tool.to_string() })
			.set(numeric);
	}

	/// Renders the text exposition format for `/metrics`.
	pub fn encode_text(&self) -> String {
		let mut buf = String::new();
		encode(&mut buf, &self.registry).expect("encoding metrics never fails");
		buf
	}
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}
