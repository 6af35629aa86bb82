//! Background reclamation of idle sessions.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::SessionRegistry;

/// Handle to a running idle reaper. Dropping it also stops the reaper.
#[derive(Debug)]
pub struct ReaperHandle {
	shutdown_tx: watch::Sender<bool>,
	join: JoinHandle<()>,
}

impl ReaperHandle {
	/// Signals the reaper and waits for its loop to exit.
	///
	/// A tick already in progress finishes closing its sessions first.
	pub async fn stop(self) {
		let _ = self.shutdown_tx.send(true);
		if let Err(err) = self.join.await {
			warn!(target = "tabcast.reaper", error = %err, "idle reaper task ended abnormally");
		}
	}

	pub fn is_finished(&self) -> bool {
		self.join.is_finished()
	}
}

pub(crate) fn spawn(registry: SessionRegistry, interval: Duration) -> ReaperHandle {
	let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
	let join = tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// The first tick completes immediately; nothing can be idle yet.
		ticker.tick().await;
		info!(target = "tabcast.reaper", interval_ms = interval.as_millis() as u64, "idle reaper started");

		loop {
			tokio::select! {
				biased;
				changed = shutdown_rx.changed() => {
					if changed.is_err() || *shutdown_rx.borrow() {
						break;
					}
				}
				_ = ticker.tick() => {
					let closed = registry.reap_idle().await;
					if !closed.is_empty() {
						debug!(target = "tabcast.reaper", closed = closed.len(), remaining = registry.len(), "reaper tick");
					}
				}
			}
		}

		info!(target = "tabcast.reaper", "idle reaper stopped");
	});

	ReaperHandle { shutdown_tx, join }
}
