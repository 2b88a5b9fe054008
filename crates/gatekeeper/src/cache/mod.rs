//! Response Cache (C5): bounded, TTL'd, keyed cache with single-flight
//! coalescing. Only safe `(tool, action)` pairs are ever cacheable — callers
//! decide cacheability before calling `get_or_populate`; write-side tools
//! (e.g. `gmail_send`) never reach this cache.

use crate::errors::GatewayError;
use async_singleflight::Group;
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheEntry {
	pub status: u16,
	pub body: serde_json::Value,
	pub headers_subset: BTreeMap<String, String>,
	pub stored_at: Instant,
	pub ttl: Duration,
}

impl CacheEntry {
	pub fn is_stale(&self) -> bool {
		self.stored_at.elapsed() >= self.ttl
	}
}

pub struct ResponseCache {
	store: Cache<String, CacheEntry>,
	/// Per-key one-shot latch: the first request for a cold key becomes the
	/// winner and populates the cache; late arrivals for the same key await
	/// the winner's outcome instead of invoking the adapter themselves.
	inflight: Group<CacheEntry, GatewayError>,
	enabled: bool,
}

impl ResponseCache {
	pub fn new(capacity: u64, enabled: bool) -> Self {
		Self {
			store: Cache::builder().max_capacity(capacity).build(),
			inflight: Group::new(),
			enabled,
		}
	}

	/// Stable cache key: `hash(agent_id, tool, action, canonical(params))`.
	/// `serde_json::Value`'s `BTreeMap`-backed object ordering (via
	/// `preserve_order` off for this call path) gives us canonical JSON for
	/// free; we additionally sort keys explicitly to be unambiguous about it.
	pub fn key(agent_id: &str, tool: &str, action: &str, params: &serde_json::Value) -> String {
		let canonical = canonicalize(params);
		let raw = format!("{agent_id}|{tool}|{action}|{canonical}");
		gatekeeper_token_hash(&raw)
	}

	pub fn get(&self, key: &str) -> Option<CacheEntry> {
		if !self.enabled {
			return None;
		}
		match self.store.get(key) {
			Some(entry) if !entry.is_stale() => Some(entry),
			Some(_) => {
				self.store.invalidate(key);
				None
			},
			None => None,
		}
	}

	pub fn put(&self, key: String, entry: CacheEntry) {
		if self.enabled {
			self.store.insert(key, entry);
		}
	}

	/// Looks up `key`; on miss, coalesces concurrent populators via
	/// single-flight so only one in-flight request actually calls
	/// `populate`, and late arrivals await its outcome. When the cache is
	/// disabled, every call is a miss that still single-flights (protecting
	/// the upstream from a thundering herd even with caching turned off).
	pub async fn get_or_populate<F, Fut>(
		&self,
		key: &str,
		ttl: Duration,
		populate: F,
	) -> (Result<CacheEntry, GatewayError>, bool)
	where
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = Result<CacheEntry, GatewayError>>,
	{
		if let Some(hit) = self.get(key) {
			return (Ok(hit), false);
		}
		let (result, shared) = self
			.inflight
			.work(key, || async move {
				let mut entry = populate().await?;
				entry.stored_at = Instant::now();
				entry.ttl = ttl;
				Ok(entry)
			})
			.await;
		if let Ok(entry) = &result {
			self.put(key.to_string(), entry.clone());
		}
		(result, shared)
	}
}

fn canonicalize(value: &serde_json::Value) -> String {
	fn sort(value: &serde_json::Value) -> serde_json::Value {
		match value {
			serde_json::Value::Object(map) => {
				let mut sorted: BTreeMap<String, serde_json::Value> = BTreeMap::new();
				for (k, v) in map {
					sorted.insert(k.clone(), sort(v));
				}
				serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
			},
			serde_json::Value::Array(items) => {
				serde_json::Value::Array(items.iter().map(sort).collect())
			},
			other => other.clone(),
		}
	}
	sort(value).to_string()
}

fn gatekeeper_token_hash(raw: &str) -> String {
	crate::token::cipher::stable_hash(raw.as_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn entry(status: u16) -> CacheEntry {
		CacheEntry {
			status,
			body: json!({"ok": true}),
			headers_subset: BTreeMap::new(),
			stored_at: Instant::now(),
			ttl: Duration::from_secs(60),
		}
	}

	#[test]
	fn canonical_key_is_order_independent() {
		let a = ResponseCache::key("ag", "serpapi", "search", &json!({"q": "x", "n": 1}));
		let b = ResponseCache::key("ag", "serpapi", "search", &json!({"n": 1, "q": "x"}));
		assert_eq!(a, b);
	}

	#[test]
	fn stale_entries_are_not_returned() {
		let cache = ResponseCache::new(10, true);
		let mut e = entry(200);
		e.ttl = Duration::from_millis(1);
		cache.put("k".into(), e);
		std::thread::sleep(Duration::from_millis(5));
		assert!(cache.get("k").is_none());
	}

	#[test]
	fn disabled_cache_always_misses() {
		let cache = ResponseCache::new(10, false);
		cache.put("k".into(), entry(200));
		assert!(cache.get("k").is_none());
	}

	#[tokio::test]
	async fn get_or_populate_coalesces_concurrent_misses() {
		use std::sync::Arc;
		use std::sync::atomic::{AtomicUsize, Ordering};

		let cache = Arc::new(ResponseCache::new(10, true));
		let calls = Arc::new(AtomicUsize::new(0));

		let mut handles = vec![];
		for _ in 0..8 {
			let cache = cache.clone();
			let calls = calls.clone();
			handles.push(tokio::spawn(async move {
				cache
					.get_or_populate("shared-key", Duration::from_secs(60), || {
						let calls = calls.clone();
						async move {
							calls.fetch_add(1, Ordering::SeqCst);
							tokio::time::sleep(Duration::from_millis(20)).await;
							Ok(entry(200))
						}
					})
					.await
			}));
		}
		for h in handles {
			h.await.unwrap().0.unwrap();
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
