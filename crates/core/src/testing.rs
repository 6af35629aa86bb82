//! Test doubles for exercising the registry without a real browser driver.
//!
//! [`MockRunner`] records every call and lets tests inject start-up delays and
//! failures:
//!
//! ```ignore
//! let runner = Arc::new(MockRunner::new());
//! runner.fail_next_start("daemon failed to start");
//! let registry = SessionRegistry::new(config, runner.clone())?;
//! assert!(registry.ensure_active(&key).await.is_err());
//! assert_eq!(runner.start_count(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tabcast_protocol::{CommandOutput, InputEvent};
use tokio::sync::Notify;

use crate::relay::FramePublisher;
use crate::runner::{CaptureTarget, CommandRunner, RunnerError, StreamEndpoint};
use crate::session::SessionKey;

/// Scriptable in-memory [`CommandRunner`].
#[derive(Debug, Default)]
pub struct MockRunner {
	endpoint: StreamEndpoint,
	starts: AtomicUsize,
	stops: AtomicUsize,
	start_delay: Mutex<Option<Duration>>,
	stop_delay: Mutex<Option<Duration>>,
	start_failures: Mutex<Vec<String>>,
	fail_stops: AtomicBool,
	publishers: Mutex<HashMap<SessionKey, FramePublisher>>,
	inputs: Mutex<Vec<(SessionKey, InputEvent)>>,
	executed: Mutex<Vec<(SessionKey, Vec<String>)>>,
	input_arrived: Notify,
}

impl MockRunner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reports `endpoint` from every successful start.
	pub fn with_endpoint(endpoint: StreamEndpoint) -> Self {
		Self {
			endpoint,
			..Self::default()
		}
	}

	/// Every subsequent start sleeps for `delay` before answering.
	pub fn set_start_delay(&self, delay: Duration) {
		*self.start_delay.lock() = Some(delay);
	}

	pub fn set_stop_delay(&self, delay: Duration) {
		*self.stop_delay.lock() = Some(delay);
	}

	/// The next start fails with `message`. Calls queue up in order.
	pub fn fail_next_start(&self, message: impl Into<String>) {
		self.start_failures.lock().push(message.into());
	}

	pub fn fail_stops(&self, fail: bool) {
		self.fail_stops.store(fail, Ordering::SeqCst);
	}

	pub fn start_count(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	pub fn stop_count(&self) -> usize {
		self.stops.load(Ordering::SeqCst)
	}

	/// Publisher handed to the most recent successful start for `key`.
	pub fn publisher(&self, key: &SessionKey) -> Option<FramePublisher> {
		self.publishers.lock().get(key).cloned()
	}

	pub fn inputs(&self) -> Vec<(SessionKey, InputEvent)> {
		self.inputs.lock().clone()
	}

	pub fn executed(&self) -> Vec<(SessionKey, Vec<String>)> {
		self.executed.lock().clone()
	}

	/// Waits until at least `count` input events have been delivered.
	pub async fn wait_for_inputs(&self, count: usize) -> Vec<(SessionKey, InputEvent)> {
		loop {
			let notified = self.input_arrived.notified();
			{
				let inputs = self.inputs.lock();
				if inputs.len() >= count {
					return inputs.clone();
				}
			}
			notified.await;
		}
	}
}

#[async_trait]
impl CommandRunner for MockRunner {
	async fn start(&self, key: &SessionKey, target: CaptureTarget) -> Result<StreamEndpoint, RunnerError> {
		self.starts.fetch_add(1, Ordering::SeqCst);
		let delay = *self.start_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let failure = {
			let mut failures = self.start_failures.lock();
			if failures.is_empty() { None } else { Some(failures.remove(0)) }
		};
		if let Some(message) = failure {
			return Err(RunnerError::Failed(message));
		}
		self.publishers.lock().insert(key.clone(), target.publisher);
		Ok(self.endpoint.clone())
	}

	async fn stop(&self, key: &SessionKey) -> Result<(), RunnerError> {
		self.stops.fetch_add(1, Ordering::SeqCst);
		let delay = *self.stop_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.publishers.lock().remove(key);
		if self.fail_stops.load(Ordering::SeqCst) {
			return Err(RunnerError::failed("browser refused to close"));
		}
		Ok(())
	}

	async fn send_input(&self, key: &SessionKey, event: InputEvent) -> Result<(), RunnerError> {
		self.inputs.lock().push((key.clone(), event));
		self.input_arrived.notify_waiters();
		Ok(())
	}

	async fn execute(&self, key: &SessionKey, args: &[String]) -> Result<CommandOutput, RunnerError> {
		self.executed.lock().push((key.clone(), args.to_vec()));
		Ok(CommandOutput::ok(args.join(" ")))
	}
}
