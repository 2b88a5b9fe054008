//! Policy Engine (C3): evaluates `(agent, tool, action, params)` against the
//! agent's active policies. Authoritative over token-carried scopes — a
//! token may claim broader tools/permissions than a policy allows, and the
//! policy always wins.

use crate::store::{PolicySpec, Store};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
	NoScope,
	DomainBlocked,
	SizeExceeded,
	NoPolicy,
}

impl DenialReason {
	pub fn as_str(self) -> &'static str {
		match self {
			DenialReason::NoScope => "no_scope",
			DenialReason::DomainBlocked => "domain_blocked",
			DenialReason::SizeExceeded => "size_exceeded",
			DenialReason::NoPolicy => "no_policy",
		}
	}
}

pub struct Decision {
	pub allow: bool,
	pub reason: Option<DenialReason>,
}

/// Tools whose params carry a network-bound target host, subject to the
/// `allowedDomains` guard. Adopters enumerate this per deployment; a fixed
/// whitelist is a reasonable default absent further config.
const NETWORK_BOUND_TOOLS: &[&str] = &["http_fetch", "serpapi", "web_search"];

#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
	#[error("store error: {0}")]
	Store(#[from] crate::store::StoreError),
}

pub struct PolicyEngine {
	store: Arc<dyn Store>,
}

impl PolicyEngine {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	pub async fn evaluate(
		&self,
		agent_id: &str,
		tool: &str,
		action: &str,
		params: &serde_json::Value,
	) -> Result<Decision, PolicyLoadError> {
		let policies = self.store.active_policies(agent_id).await?;
		if policies.is_empty() {
			return Ok(deny(DenialReason::NoPolicy));
		}

		let scope = format!("{tool}:{action}");
		let matching: Vec<&PolicySpec> = policies
			.iter()
			.map(|p| &p.spec)
			.filter(|spec| spec.scopes.contains(&scope))
			.collect();

		if matching.is_empty() {
			return Ok(deny(DenialReason::NoScope));
		}

		let params_len = serde_json::to_vec(params).map(|v| v.len()).unwrap_or(0);
		for spec in &matching {
			if let Some(max) = spec.guards.max_request_size {
				if params_len > max {
					return Ok(deny(DenialReason::SizeExceeded));
				}
			}
		}

		if NETWORK_BOUND_TOOLS.contains(&tool) {
			if let Some(host) = target_host(params) {
				let host_allowed = matching.iter().any(|spec| match &spec.guards.allowed_domains {
					None => true,
					Some(domains) => domains.iter().any(|d| domain_matches(d, &host)),
				});
				if !host_allowed {
					return Ok(deny(DenialReason::DomainBlocked));
				}
			}
		}

		Ok(Decision {
			allow: true,
			reason: None,
		})
	}
}

fn deny(reason: DenialReason) -> Decision {
	Decision {
		allow: false,
		reason: Some(reason),
	}
}

fn target_host(params: &serde_json::Value) -> Option<String> {
	params
		.get("host")
		.or_else(|| params.get("url"))
		.and_then(|v| v.as_str())
		.map(|s| {
			// Accept either a bare host or a full URL; extract the host part.
			s.strip_prefix("https://")
				.or_else(|| s.strip_prefix("http://"))
				.unwrap_or(s)
				.split(['/', ':'])
				.next()
				.unwrap_or(s)
				.to_string()
		})
}

/// Suffix match: `allowed == host` or `host` ends with `.allowed`.
fn domain_matches(allowed: &str, host: &str) -> bool {
	host == allowed || host.ends_with(&format!(".{allowed}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::memory::MemoryStore;
	use crate::store::{Policy, PolicyGuards};
	use chrono::Utc;
	use serde_json::json;
	use std::collections::BTreeSet;

	async fn engine_with_policy(spec: PolicySpec) -> PolicyEngine {
		let store = MemoryStore::new();
		let now = Utc::now();
		store
			.put_policy(Policy {
				id: "p1".into(),
				agent_id: "a1".into(),
				name: "default".into(),
				spec,
				spec_hash: "h".into(),
				active: true,
				created_at: now,
				updated_at: now,
			})
			.await
			.unwrap();
		PolicyEngine::new(Arc::new(store))
	}

	#[tokio::test]
	async fn allows_when_scope_present() {
		let engine = engine_with_policy(PolicySpec {
			scopes: BTreeSet::from(["serpapi:search".to_string()]),
			..Default::default()
		})
		.await;
		let decision = engine
			.evaluate("a1", "serpapi", "search", &json!({"q": "x"}))
			.await
			.unwrap();
		assert!(decision.allow);
	}

	#[tokio::test]
	async fn denies_missing_scope() {
		let engine = engine_with_policy(PolicySpec {
			scopes: BTreeSet::from(["serpapi:search".to_string()]),
			..Default::default()
		})
		.await;
		let decision = engine
			.evaluate("a1", "gmail_send", "send", &json!({}))
			.await
			.unwrap();
		assert!(!decision.allow);
		assert_eq!(decision.reason, Some(DenialReason::NoScope));
	}

	#[tokio::test]
	async fn denies_when_no_policy_at_all() {
		let store = MemoryStore::new();
		let engine = PolicyEngine::new(Arc::new(store));
		let decision = engine
			.evaluate("ghost", "serpapi", "search", &json!({}))
			.await
			.unwrap();
		assert_eq!(decision.reason, Some(DenialReason::NoPolicy));
	}

	#[tokio::test]
	async fn enforces_allowed_domains_with_suffix_match() {
		let mut guards = PolicyGuards::default();
		guards.allowed_domains = Some(BTreeSet::from(["example.com".to_string()]));
		let engine = engine_with_policy(PolicySpec {
			scopes: BTreeSet::from(["http_fetch:get".to_string()]),
			guards,
			..Default::default()
		})
		.await;

		let allowed = engine
			.evaluate("a1", "http_fetch", "get", &json!({"url": "https://api.example.com/v1"}))
			.await
			.unwrap();
		assert!(allowed.allow);

		let denied = engine
			.evaluate("a1", "http_fetch", "get", &json!({"url": "https://evil.test/x"}))
			.await
			.unwrap();
		assert_eq!(denied.reason, Some(DenialReason::DomainBlocked));
	}

	#[tokio::test]
	async fn enforces_max_request_size() {
		let mut guards = PolicyGuards::default();
		guards.max_request_size = Some(8);
		let engine = engine_with_policy(PolicySpec {
			scopes: BTreeSet::from(["serpapi:search".to_string()]),
			guards,
			..Default::default()
		})
		.await;
		let decision = engine
			.evaluate("a1", "serpapi", "search", &json!({"q": "a very long query string"}))
			.await
			.unwrap();
		assert_eq!(decision.reason, Some(DenialReason::SizeExceeded));
	}
}
