//! Rate Limiter (C4): fixed 60-second windows keyed by agent id.
//! Counters live in a sharded map in process memory — tolerating a restart
//! is an accepted soft-limit trade-off.

use gatekeeper_core::shard::ShardedMap;
use std::time::{SystemTime, UNIX_EPOCH};

const WINDOW_SECS: u64 = 60;

struct Window {
	start: u64,
	count: u32,
}

pub struct Decision {
	pub allowed: bool,
	pub retry_after_secs: u64,
}

pub struct RateLimiter {
	limit: u32,
	windows: ShardedMap<String, Window>,
}

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock before unix epoch")
		.as_secs()
}

impl RateLimiter {
	pub fn new(limit_per_minute: u32) -> Self {
		Self {
			limit: limit_per_minute,
			windows: ShardedMap::new(),
		}
	}

	/// Checks and increments the counter for `key` (an agent id, or
	/// `agent_id:tool` for the optional second-tier per-tool limit).
	pub fn check(&self, key: &str) -> Decision {
		let now = now_secs();
		let window_start = now - (now % WINDOW_SECS);
		self.windows.with_entry(&key.to_string(), |map, k| {
			let entry = map.entry(k.clone()).or_insert(Window {
				start: window_start,
				count: 0,
			});
			if entry.start != window_start {
				entry.start = window_start;
				entry.count = 0;
			}
			entry.count += 1;
			let remainder = WINDOW_SECS - (now - entry.start);
			if entry.count > self.limit {
				Decision {
					allowed: false,
					retry_after_secs: remainder,
				}
			} else {
				Decision {
					allowed: true,
					retry_after_secs: 0,
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allows_up_to_limit_then_denies() {
		let limiter = RateLimiter::new(3);
		for _ in 0..3 {
			assert!(limiter.check("agent-1").allowed);
		}
		let fourth = limiter.check("agent-1");
		assert!(!fourth.allowed);
		assert!(fourth.retry_after_secs <= 60);
	}

	#[test]
	fn counters_are_independent_per_key() {
		let limiter = RateLimiter::new(1);
		assert!(limiter.check("agent-1").allowed);
		assert!(limiter.check("agent-2").allowed);
		assert!(!limiter.check("agent-1").allowed);
	}
}
