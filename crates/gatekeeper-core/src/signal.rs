//! Graceful shutdown plumbing: a broadcast trigger fired on SIGTERM/SIGINT
//! or explicit `shutdown()`, and a cloneable watcher servers can `await`.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownTrigger {
	tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownWatcher {
	rx: watch::Receiver<bool>,
}

pub fn new() -> (ShutdownTrigger, ShutdownWatcher) {
	let (tx, rx) = watch::channel(false);
	(ShutdownTrigger { tx }, ShutdownWatcher { rx })
}

impl ShutdownTrigger {
	pub fn shutdown(&self) {
		let _ = self.tx.send(true);
	}

	/// Spawns a task that fires this trigger on SIGTERM/SIGINT (Unix) or
	/// Ctrl+C (other platforms).
	pub fn spawn_signal_handler(self) {
		tokio::spawn(async move {
			wait_for_signal().await;
			tracing::info!("shutdown signal received, draining");
			self.shutdown();
		});
	}
}

impl ShutdownWatcher {
	pub async fn signaled(&mut self) {
		let _ = self.rx.wait_for(|v| *v).await;
	}

	pub fn is_signaled(&self) -> bool {
		*self.rx.borrow()
	}
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};
	let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
	let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
	tokio::select! {
		_ = term.recv() => {},
		_ = int.recv() => {},
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn trigger_wakes_watcher() {
		let (trigger, mut watcher) = new();
		assert!(!watcher.is_signaled());
		trigger.shutdown();
		watcher.signaled().await;
		assert!(watcher.is_signaled());
	}
}
