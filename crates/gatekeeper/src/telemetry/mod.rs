//! SSE Broker (C13) and Telemetry Sink (C15): per-run event replay buffers
//! and the correlation-scoped span/event callback surface the proxy
//! pipeline invokes pre- and post-adapter.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_stream::Stream;

const RING_BUFFER_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 256;
pub const MAX_STREAMS_PER_RUN: usize = 8;
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunEvent {
	pub id: u64,
	pub event: String,
	pub data: serde_json::Value,
	pub recorded_at: DateTime<Utc>,
}

struct RunChannel {
	buffer: VecDeque<RunEvent>,
	next_id: u64,
	sender: broadcast::Sender<RunEvent>,
	subscriber_count: usize,
}

impl RunChannel {
	fn new() -> Self {
		let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
		Self {
			buffer: VecDeque::with_capacity(RING_BUFFER_CAPACITY),
			next_id: 1,
			sender,
			subscriber_count: 0,
		}
	}

	fn push(&mut self, event: &str, data: serde_json::Value) -> RunEvent {
		let record = RunEvent {
			id: self.next_id,
			event: event.to_string(),
			data,
			recorded_at: Utc::now(),
		};
		self.next_id += 1;
		if self.buffer.len() == RING_BUFFER_CAPACITY {
			self.buffer.pop_front();
		}
		self.buffer.push_back(record.clone());
		// Dropping on a lagged/slow subscriber is the broadcast channel's
		// built-in behavior; we don't propagate the send error.
		let _ = self.sender.send(record.clone());
		record
	}

	fn replay_after(&self, last_seen_id: Option<u64>) -> Vec<RunEvent> {
		self
			.buffer
			.iter()
			.filter(|e| last_seen_id.map(|seen| e.id > seen).unwrap_or(true))
			.cloned()
			.collect()
	}
}

/// Per-run SSE event broker. One `RunChannel` per run id, created lazily on
/// first publish or subscribe.
#[derive(Default)]
pub struct SseBroker {
	runs: RwLock<HashMap<String, RunChannel>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
	#[error("run has reached its maximum concurrent subscriber count")]
	TooManySubscribers,
}

pub struct Subscription {
	pub replay: Vec<RunEvent>,
	pub receiver: broadcast::Receiver<RunEvent>,
	/// Decrements the run's subscriber count when the subscription is
	/// dropped. Must be held for the lifetime of the stream built from
	/// `replay`/`receiver`, not discarded early.
	pub guard: SubscriptionGuard,
}

/// Releases a subscriber slot on drop, e.g. when a client disconnects
/// mid-stream and the SSE response's underlying stream is torn down.
pub struct SubscriptionGuard {
	broker: Arc<SseBroker>,
	run_id: String,
}

impl Drop for SubscriptionGuard {
	fn drop(&mut self) {
		let broker = self.broker.clone();
		let run_id = std::mem::take(&mut self.run_id);
		tokio::spawn(async move {
			broker.unsubscribe(&run_id).await;
		});
	}
}

/// Wraps a stream with a value that is dropped once the stream itself is
/// dropped (end of iteration or the consumer giving up early), rather than
/// only when it's explicitly unwrapped.
pub struct GuardedStream<S> {
	inner: S,
	_guard: SubscriptionGuard,
}

impl<S> GuardedStream<S> {
	pub fn new(inner: S, guard: SubscriptionGuard) -> Self {
		Self { inner, _guard: guard }
	}
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
	type Item = S::Item;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Pin::new(&mut self.get_mut().inner).poll_next(cx)
	}
}

impl SseBroker {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn publish(&self, run_id: &str, event: &str, data: serde_json::Value) -> RunEvent {
		let mut runs = self.runs.write().await;
		let channel = runs.entry(run_id.to_string()).or_insert_with(RunChannel::new);
		channel.push(event, data)
	}

	/// Subscribes to `run_id`, replaying buffered events newer than
	/// `last_event_id` before the caller starts reading the live receiver.
	/// Takes `Arc<Self>` so the returned subscription's guard can release its
	/// slot asynchronously without the caller keeping the broker alive itself.
	pub async fn subscribe(
		self: &Arc<Self>,
		run_id: &str,
		last_event_id: Option<u64>,
	) -> Result<Subscription, SubscribeError> {
		let mut runs = self.runs.write().await;
		let channel = runs.entry(run_id.to_string()).or_insert_with(RunChannel::new);
		if channel.subscriber_count >= MAX_STREAMS_PER_RUN {
			return Err(SubscribeError::TooManySubscribers);
		}
		channel.subscriber_count += 1;
		Ok(Subscription {
			replay: channel.replay_after(last_event_id),
			receiver: channel.sender.subscribe(),
			guard: SubscriptionGuard {
				broker: self.clone(),
				run_id: run_id.to_string(),
			},
		})
	}

	pub async fn unsubscribe(&self, run_id: &str) {
		let mut runs = self.runs.write().await;
		if let Some(channel) = runs.get_mut(run_id) {
			channel.subscriber_count = channel.subscriber_count.saturating_sub(1);
		}
	}
}

/// Opaque span/event sink the proxy pipeline calls before and after each
/// adapter invocation. The content-safety subsystem consuming this stream
/// is an external collaborator; this interface only guarantees the calls
/// happen at the right points, not what a consumer does with them.
pub trait TelemetrySink: Send + Sync {
	fn record_span(&self, correlation_id: &str, kind: &str, details: &serde_json::Value);
	fn record_event(&self, correlation_id: &str, kind: &str, details: &serde_json::Value);
}

/// Default sink: structured `tracing` events under `target = "telemetry"`.
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
	fn record_span(&self, correlation_id: &str, kind: &str, details: &serde_json::Value) {
		tracing::debug!(target: "telemetry", correlation_id, kind, %details, "span");
	}

	fn record_event(&self, correlation_id: &str, kind: &str, details: &serde_json::Value) {
		tracing::debug!(target: "telemetry", correlation_id, kind, %details, "event");
	}
}

pub type SharedTelemetrySink = Arc<dyn TelemetrySink>;
