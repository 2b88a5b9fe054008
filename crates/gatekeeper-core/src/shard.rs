//! A small N-way sharded concurrent map.
//!
//! Each key hashes to one of `SHARDS` independent `Mutex<HashMap<..>>`
//! buckets, so unrelated keys never contend on the same lock. This is the
//! concurrency primitive behind the cache, breaker state, and rate counter
//! tables: there is no single global lock for any of them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher, RandomState};

const SHARDS: usize = 64;

pub struct ShardedMap<K, V> {
	shards: Vec<Mutex<HashMap<K, V>>>,
	hasher: RandomState,
}

impl<K, V> Default for ShardedMap<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> ShardedMap<K, V> {
	pub fn new() -> Self {
		let mut shards = Vec::with_capacity(SHARDS);
		for _ in 0..SHARDS {
			shards.push(Mutex::new(HashMap::new()));
		}
		Self {
			shards,
			hasher: RandomState::new(),
		}
	}
}

impl<K, V> ShardedMap<K, V>
where
	K: Hash + Eq + Clone,
{
	fn shard_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
		let mut h = self.hasher.build_hasher();
		key.hash(&mut h);
		(h.finish() as usize) % self.shards.len()
	}

	/// Runs `f` with exclusive access to the bucket holding `key`, inserting,
	/// reading, or removing as `f` sees fit. This is the primitive atomic
	/// compare-and-set per key operation used by the idempotency store.
	pub fn with_entry<R>(&self, key: &K, f: impl FnOnce(&mut HashMap<K, V>, &K) -> R) -> R {
		let idx = self.shard_index(key);
		let mut bucket = self.shards[idx].lock();
		f(&mut bucket, key)
	}

	pub fn get_cloned(&self, key: &K) -> Option<V>
	where
		V: Clone,
	{
		let idx = self.shard_index(key);
		self.shards[idx].lock().get(key).cloned()
	}

	pub fn insert(&self, key: K, value: V) -> Option<V> {
		let idx = self.shard_index(&key);
		self.shards[idx].lock().insert(key, value)
	}

	pub fn remove(&self, key: &K) -> Option<V> {
		let idx = self.shard_index(key);
		self.shards[idx].lock().remove(key)
	}

	pub fn len(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Removes every entry for which `pred` returns true. Used for TTL sweeps.
	pub fn retain(&self, mut pred: impl FnMut(&K, &mut V) -> bool) {
		for shard in &self.shards {
			shard.lock().retain(|k, v| pred(k, v));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_get_remove_roundtrip() {
		let m: ShardedMap<String, u32> = ShardedMap::new();
		m.insert("a".to_string(), 1);
		m.insert("b".to_string(), 2);
		assert_eq!(m.get_cloned(&"a".to_string()), Some(1));
		assert_eq!(m.len(), 2);
		assert_eq!(m.remove(&"a".to_string()), Some(1));
		assert_eq!(m.get_cloned(&"a".to_string()), None);
	}

	#[test]
	fn with_entry_is_atomic_per_key() {
		let m: ShardedMap<String, u32> = ShardedMap::new();
		let key = "k".to_string();
		let first = m.with_entry(&key, |map, k| {
			if map.contains_key(k) {
				false
			} else {
				map.insert(k.clone(), 1);
				true
			}
		});
		let second = m.with_entry(&key, |map, k| {
			if map.contains_key(k) {
				false
			} else {
				map.insert(k.clone(), 1);
				true
			}
		});
		assert!(first);
		assert!(!second);
	}
}
