//! Circuit Breaker (C6): per-tool three-state breaker over a sliding
//! failure window. Breaker state transitions observed by one request may
//! lag behind a concurrent request's transition — both outcomes are safe.

use crate::metrics::{BreakerStateValue, Metrics};
use gatekeeper_core::shard::ShardedMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Closed,
	Open,
	HalfOpen,
}

impl From<State> for BreakerStateValue {
	fn from(s: State) -> Self {
		match s {
			State::Closed => BreakerStateValue::Closed,
			State::Open => BreakerStateValue::Open,
			State::HalfOpen => BreakerStateValue::HalfOpen,
		}
	}
}

struct Tool {
	state: State,
	/// timestamps of failures within `window`
	failures: VecDeque<Instant>,
	opened_at: Option<Instant>,
	half_open_probes_in_flight: u32,
}

impl Tool {
	fn new() -> Self {
		Self {
			state: State::Closed,
			failures: VecDeque::new(),
			opened_at: None,
			half_open_probes_in_flight: 0,
		}
	}
}

pub struct Params {
	pub failure_threshold: u32,
	pub window: Duration,
	pub open_duration: Duration,
	pub half_open_max_probes: u32,
}

impl Default for Params {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			window: Duration::from_secs(30),
			open_duration: Duration::from_secs(30),
			half_open_max_probes: 1,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
	Pass,
	FastFail,
}

pub struct CircuitBreaker {
	enabled: bool,
	params: Params,
	tools: ShardedMap<String, Tool>,
	metrics: Arc<Metrics>,
}

impl CircuitBreaker {
	pub fn new(enabled: bool, params: Params, metrics: Arc<Metrics>) -> Self {
		Self {
			enabled,
			params,
			tools: ShardedMap::new(),
			metrics,
		}
	}

	/// Checks whether a call to `tool` may proceed, transitioning
	/// open -> half_open once `open_duration` has elapsed.
	pub fn gate(&self, tool: &str) -> Gate {
		if !self.enabled {
			return Gate::Pass;
		}
		self.tools.with_entry(&tool.to_string(), |map, key| {
			let entry = map.entry(key.clone()).or_insert_with(Tool::new);
			match entry.state {
				State::Closed => Gate::Pass,
				State::Open => {
					let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
					if elapsed >= self.params.open_duration {
						entry.state = State::HalfOpen;
						entry.half_open_probes_in_flight = 0;
						self.metrics.record_breaker_gauge(tool, BreakerStateValue::HalfOpen);
						self
							.metrics
							.breaker_transitions_total
							.get_or_create(&crate::metrics::BreakerTransitionLabel {
								tool: tool.to_string(),
								to: BreakerStateValue::HalfOpen,
							})
							.inc();
						self.admit_half_open_probe(entry, tool)
					} else {
						self.metrics.breaker_fastfail_total.get_or_create(&crate::metrics::ToolLabel {
							tool: tool.to_string(),
						}).inc();
						Gate::FastFail
					}
				},
				State::HalfOpen => self.admit_half_open_probe(entry, tool),
			}
		})
	}

	fn admit_half_open_probe(&self, entry: &mut Tool, tool: &str) -> Gate {
		if entry.half_open_probes_in_flight < self.params.half_open_max_probes {
			entry.half_open_probes_in_flight += 1;
			Gate::Pass
		} else {
			self.metrics.breaker_fastfail_total.get_or_create(&crate::metrics::ToolLabel {
				tool: tool.to_string(),
			}).inc();
			Gate::FastFail
		}
	}

	/// Records a call outcome. 4xx/policy failures must not be passed here —
	/// only network errors, 5xx, and timeouts count.
	pub fn record_success(&self, tool: &str) {
		if !self.enabled {
			return;
		}
		self.tools.with_entry(&tool.to_string(), |map, key| {
			let entry = map.entry(key.clone()).or_insert_with(Tool::new);
			match entry.state {
				State::HalfOpen => {
					entry.state = State::Closed;
					entry.failures.clear();
					entry.opened_at = None;
					entry.half_open_probes_in_flight = 0;
					self.metrics.record_breaker_gauge(tool, BreakerStateValue::Closed);
					self
						.metrics
						.breaker_transitions_total
						.get_or_create(&crate::metrics::BreakerTransitionLabel {
							tool: tool.to_string(),
							to: BreakerStateValue::Closed,
						})
						.inc();
				},
				State::Closed => {
					self.prune(entry);
				},
				State::Open => {},
			}
		});
	}

	pub fn record_failure(&self, tool: &str) {
		if !self.enabled {
			return;
		}
		self.tools.with_entry(&tool.to_string(), |map, key| {
			let entry = map.entry(key.clone()).or_insert_with(Tool::new);
			match entry.state {
				State::HalfOpen => {
					entry.state = State::Open;
					entry.opened_at = Some(Instant::now());
					entry.half_open_probes_in_flight = 0;
					self.metrics.record_breaker_gauge(tool, BreakerStateValue::Open);
					self
						.metrics
						.breaker_transitions_total
						.get_or_create(&crate::metrics::BreakerTransitionLabel {
							tool: tool.to_string(),
							to: BreakerStateValue::Open,
						})
						.inc();
				},
				State::Closed => {
					self.prune(entry);
					entry.failures.push_back(Instant::now());
					// Exactly `failure_threshold` failures keeps the breaker closed;
					// the next one (threshold + 1) opens it.
					if entry.failures.len() as u32 > self.params.failure_threshold {
						entry.state = State::Open;
						entry.opened_at = Some(Instant::now());
						self.metrics.record_breaker_gauge(tool, BreakerStateValue::Open);
						self
							.metrics
							.breaker_transitions_total
							.get_or_create(&crate::metrics::BreakerTransitionLabel {
								tool: tool.to_string(),
								to: BreakerStateValue::Open,
							})
							.inc();
					}
				},
				State::Open => {},
			}
		});
	}

	/// Releases a half-open probe slot without recording a success or
	/// failure, for call attempts that never reached the adapter (e.g. a
	/// missing credential). Without this, an early return after `gate()` has
	/// admitted a probe leaks that slot and the breaker can wedge itself
	/// below `half_open_max_probes` forever. No-op outside `half_open`.
	pub fn release_probe(&self, tool: &str) {
		if !self.enabled {
			return;
		}
		self.tools.with_entry(&tool.to_string(), |map, key| {
			let entry = map.entry(key.clone()).or_insert_with(Tool::new);
			if entry.state == State::HalfOpen {
				entry.half_open_probes_in_flight = entry.half_open_probes_in_flight.saturating_sub(1);
			}
		});
	}

	fn prune(&self, entry: &mut Tool) {
		let window = self.params.window;
		while let Some(front) = entry.failures.front() {
			if front.elapsed() > window {
				entry.failures.pop_front();
			} else {
				break;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn breaker(threshold: u32) -> CircuitBreaker {
		CircuitBreaker::new(
			true,
			Params {
				failure_threshold: threshold,
				window: Duration::from_secs(30),
				open_duration: Duration::from_millis(20),
				half_open_max_probes: 1,
			},
			Arc::new(Metrics::new()),
		)
	}

	#[test]
	fn exactly_threshold_failures_keeps_closed_next_opens() {
		let b = breaker(3);
		for _ in 0..3 {
			assert_eq!(b.gate("t"), Gate::Pass);
			b.record_failure("t");
		}
		// exactly `failure_threshold` (3) failures recorded -> still closed
		assert_eq!(b.gate("t"), Gate::Pass);
		b.record_failure("t");
		// the 4th (threshold + 1) failure opens it
		assert_eq!(b.gate("t"), Gate::FastFail);
	}

	#[test]
	fn open_then_half_open_then_closed_on_success() {
		let b = breaker(0);
		assert_eq!(b.gate("t"), Gate::Pass);
		b.record_failure("t");
		assert_eq!(b.gate("t"), Gate::FastFail);

		std::thread::sleep(Duration::from_millis(30));
		assert_eq!(b.gate("t"), Gate::Pass); // half-open probe admitted
		b.record_success("t");
		assert_eq!(b.gate("t"), Gate::Pass); // closed again
	}

	#[test]
	fn half_open_failure_reopens() {
		let b = breaker(0);
		b.gate("t");
		b.record_failure("t");
		std::thread::sleep(Duration::from_millis(30));
		assert_eq!(b.gate("t"), Gate::Pass);
		b.record_failure("t");
		assert_eq!(b.gate("t"), Gate::FastFail);
	}

	#[test]
	fn releasing_a_half_open_probe_lets_another_one_through() {
		let b = breaker(0);
		b.gate("t");
		b.record_failure("t");
		std::thread::sleep(Duration::from_millis(30));

		// Probe admitted, but the caller bails out before it can record a
		// success or failure (e.g. a missing credential).
		assert_eq!(b.gate("t"), Gate::Pass);
		assert_eq!(b.gate("t"), Gate::FastFail); // max_probes is 1, slot still held

		b.release_probe("t");
		assert_eq!(b.gate("t"), Gate::Pass); // slot freed, a fresh probe is admitted
	}

	#[test]
	fn disabled_breaker_always_passes() {
		let b = CircuitBreaker::new(false, Params::default(), Arc::new(Metrics::new()));
		for _ in 0..100 {
			b.record_failure("t");
		}
		assert_eq!(b.gate("t"), Gate::Pass);
	}
}
