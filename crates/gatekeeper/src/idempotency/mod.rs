//! Idempotency Store (C9): a client-supplied key maps to exactly one
//! response body. Replaying the same key with the same request body returns
//! the stored response; replaying it with a different body is a conflict.

use gatekeeper_core::shard::ShardedMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredResponse {
	pub status: u16,
	pub body: serde_json::Value,
	pub body_hash: String,
	pub stored_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyError {
	#[error("idempotency key is not a valid uuid")]
	InvalidKey,
	#[error("idempotency key reused with a different request body")]
	Conflict {
		/// The body hash recorded by the original request.
		expected_body_hash: String,
	},
}

pub enum Lookup {
	/// No record for this key; caller should perform the request and then
	/// call `store`.
	Miss,
	/// A record already exists for this key and request body; return it as
	/// the response without re-invoking the adapter.
	Hit(StoredResponse),
}

pub struct IdempotencyStore {
	records: ShardedMap<String, StoredResponse>,
	ttl: Duration,
	metrics: std::sync::Arc<crate::metrics::Metrics>,
}

pub fn validate_key(key: &str) -> Result<(), IdempotencyError> {
	Uuid::parse_str(key).map(|_| ()).map_err(|_| IdempotencyError::InvalidKey)
}

impl IdempotencyStore {
	pub fn new(ttl: Duration, metrics: std::sync::Arc<crate::metrics::Metrics>) -> Self {
		Self {
			records: ShardedMap::new(),
			ttl,
			metrics,
		}
	}

	/// Looks up `key` for a request whose body hashes to `body_hash`.
	/// A stale record (past `ttl`) is treated as a miss and evicted.
	pub fn lookup(&self, key: &str, body_hash: &str) -> Result<Lookup, IdempotencyError> {
		validate_key(key)?;
		let existing = self.records.with_entry(&key.to_string(), |map, k| {
			match map.get(k) {
				Some(record) if record.stored_at.elapsed() >= self.ttl => {
					map.remove(k);
					None
				},
				Some(record) => Some(record.clone()),
				None => None,
			}
		});
		match existing {
			None => Ok(Lookup::Miss),
			Some(record) if record.body_hash == body_hash => Ok(Lookup::Hit(record)),
			Some(record) => {
				self.metrics.idempotency_conflicts_total.inc();
				Err(IdempotencyError::Conflict {
					expected_body_hash: record.body_hash,
				})
			},
		}
	}

	/// Records the response for `key`, to be returned verbatim on replay.
	pub fn store(&self, key: &str, status: u16, body: serde_json::Value, body_hash: String) {
		self.records.insert(
			key.to_string(),
			StoredResponse {
				status,
				body,
				body_hash,
				stored_at: Instant::now(),
			},
		);
	}
}

pub fn body_hash(body: &serde_json::Value) -> String {
	crate::token::cipher::stable_hash(body.to_string().as_bytes())
}
