//! The session registry: one live browser session and stream relay per key.
//!
//! [`SessionRegistry`] is the single source of truth for session lifecycle. It
//! assigns ports, binds relays, asks the [`CommandRunner`] to start and stop
//! browsers, and tracks activity so idle sessions can be reclaimed.
//!
//! Start and close for the same key are serialized by a per-key async mutex;
//! different keys never wait on each other. Reads (`get`, `list_active`, `touch`)
//! only take short map locks.


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tabcast_protocol::{CommandOutput, InputEvent, StreamFrame};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::reaper::{self, ReaperHandle};
use crate::relay::{InputReceiver, StreamRelay, ViewerHandle};
use crate::runner::{CaptureTarget, CommandRunner};
use crate::session::{ActivityClock, Session, SessionKey};

type KeyLock = Arc<tokio::sync::Mutex<()>>;

struct Entry {
	key: SessionKey,
	port: u16,
	created_at: Instant,
	stream_url: String,
	activity: Arc<ActivityClock>,
	relay: StreamRelay,
	input_pump: JoinHandle<()>,
}

impl Entry {
	fn snapshot(&self) -> Session {
		let status = self.relay.status();
		Session {
			key: self.key.clone(),
			port: self.port,
			active: true,
			created_at: self.created_at,
			last_activity_at: self.activity.last(),
			viewer_count: self.relay.viewer_count(),
			capturing: status.capturing,
			viewport: status.viewport(),
			stream_url: self.stream_url.clone(),
		}
	}
}

impl Drop for Entry {
	fn drop(&mut self) {
		self.input_pump.abort();
	}
}

struct Inner {
	config: StreamConfig,
	runner: Arc<dyn CommandRunner>,
	ports: PortAllocator,
	sessions: DashMap<SessionKey, Arc<Entry>>,
	locks: DashMap<SessionKey, KeyLock>,
	reaper_started: AtomicBool,
}

/// Cloneable handle to a set of browser sessions.
#[derive(Clone)]
pub struct SessionRegistry {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry")
			.field("sessions", &self.inner.sessions.len())
			.field("base_port", &self.inner.ports.base())
			.field("port_range", &self.inner.ports.range())
			.finish()
	}
}

impl SessionRegistry {
	/// Builds a registry. Fails if `config` does not validate.
	pub fn new(config: StreamConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
		config.validate()?;
		let ports = PortAllocator::new(config.base_port, config.port_range)?;
		Ok(Self {
			inner: Arc::new(Inner {
				config,
				runner,
				ports,
				sessions: DashMap::new(),
				locks: DashMap::new(),
				reaper_started: AtomicBool::new(false),
			}),
		})
	}

	pub fn config(&self) -> &StreamConfig {
		&self.inner.config
	}

	/// Sorted ports currently reserved by live sessions.
	pub fn held_ports(&self) -> Vec<u16> {
		self.inner.ports.held()
	}

	/// Returns the live session for `key`, starting one if needed.
	///
	/// An existing session is touched. A new one gets a port, a bound relay, and a
	/// browser started through the command runner within the start-up timeout. Any
	/// failure rolls all of that back before the error is returned.
	pub async fn ensure_active(&self, key: &SessionKey) -> Result<Session> {
		if let Some(session) = self.touch_existing(key) {
			return Ok(session);
		}

		let lock = self.key_lock(key);
		let result = {
			let _guard = lock.lock().await;
			match self.touch_existing(key) {
				Some(session) => Ok(session),
				None => self.start_session(key).await,
			}
		};
		self.forget_lock(key, &lock);
		result
	}

	async fn start_session(&self, key: &SessionKey) -> Result<Session> {
		let inner = &self.inner;
		let config = &inner.config;
		let port = inner.ports.allocate(key)?;
		let activity = Arc::new(ActivityClock::new(Instant::now()));
		let (relay, input_rx) = StreamRelay::new(key.clone(), port, config.viewer_queue_capacity, Arc::clone(&activity));

		if config.serve_viewers {
			if let Err(err) = relay.bind(&config.bind_host).await {
				inner.ports.release(port);
				warn!(target = "tabcast.registry", session = %key, port, error = %err, "failed to bind viewer endpoint");
				return Err(err);
			}
		}

		debug!(target = "tabcast.registry", session = %key, port, "starting browser session");
		let target = CaptureTarget {
			port,
			publisher: relay.publisher(),
		};
		let startup_timeout = config.startup_timeout();
		let endpoint = match timeout(startup_timeout, inner.runner.start(key, target)).await {
			Ok(Ok(endpoint)) => endpoint,
			Ok(Err(source)) => {
				self.roll_back(&relay, port).await;
				warn!(target = "tabcast.registry", session = %key, port, error = %source, "browser start failed, rolled back");
				return Err(Error::CommandRunner {
					key: key.clone(),
					op: "start",
					source,
				});
			}
			Err(_) => {
				self.roll_back(&relay, port).await;
				warn!(target = "tabcast.registry", session = %key, port, timeout_ms = startup_timeout.as_millis() as u64, "browser start timed out, rolled back");
				self.stop_abandoned(key).await;
				return Err(Error::StartupTimeout {
					key: key.clone(),
					timeout: startup_timeout,
				});
			}
		};

		// Frames may already be flowing; their viewport wins over the runner's report.
		if !relay.status().capturing {
			relay.set_status(endpoint.capturing, endpoint.viewport);
		}
		let input_pump = spawn_input_pump(Arc::clone(&inner.runner), key.clone(), input_rx);
		let entry = Arc::new(Entry {
			key: key.clone(),
			port,
			created_at: activity.last(),
			stream_url: config.stream_url(port),
			activity,
			relay,
			input_pump,
		});
		let session = entry.snapshot();
		inner.sessions.insert(key.clone(), entry);
		info!(
			target = "tabcast.registry",
			session = %key,
			port,
			upstream = endpoint.upstream.as_deref().unwrap_or("-"),
			"browser session active"
		);
		Ok(session)
	}

	async fn roll_back(&self, relay: &StreamRelay, port: u16) {
		relay.shutdown().await;
		self.inner.ports.release(port);
	}

	/// Stops whatever a timed-out start left behind. Runs under the key lock so a
	/// retried start for the same key cannot be torn down by it.
	async fn stop_abandoned(&self, key: &SessionKey) {
		let stop_timeout = self.inner.config.stop_timeout();
		match timeout(stop_timeout, self.inner.runner.stop(key)).await {
			Ok(Ok(())) => debug!(target = "tabcast.registry", session = %key, "stopped browser after start-up timeout"),
			Ok(Err(err)) => warn!(target = "tabcast.registry", session = %key, error = %err, "cleanup stop after start-up timeout failed"),
			Err(_) => warn!(target = "tabcast.registry", session = %key, "cleanup stop after start-up timeout timed out"),
		}
	}

	fn touch_existing(&self, key: &SessionKey) -> Option<Session> {
		let entry = self.inner.sessions.get(key)?;
		entry.activity.touch();
		Some(entry.snapshot())
	}

	/// Records a browser-affecting interaction. Unknown keys are ignored.
	pub fn touch(&self, key: &SessionKey) {
		if let Some(entry) = self.inner.sessions.get(key) {
			entry.activity.touch();
		}
	}

	/// Tears down the session for `key`, if any.
	///
	/// Viewers are disconnected immediately, the browser is stopped within the stop
	/// timeout, and the port is released even when stopping fails. Closing an unknown
	/// key succeeds. A failed stop is reported after cleanup.
	pub async fn close(&self, key: &SessionKey) -> Result<()> {
		self.close_where(key, |_| true).await.map(|_| ())
	}

	/// Closes `key` only if it is still idle past `idle_timeout` once its lock is held.
	/// Returns whether the session was closed.
	async fn close_if_idle(&self, key: &SessionKey, idle_timeout: Duration) -> Result<bool> {
		self.close_where(key, |entry| entry.activity.idle_for() > idle_timeout).await
	}

	async fn close_where(&self, key: &SessionKey, should_close: impl Fn(&Entry) -> bool) -> Result<bool> {
		let lock = self.key_lock(key);
		let result = {
			let _guard = lock.lock().await;
			let removed = self.inner.sessions.remove_if(key, |_, entry| should_close(entry.as_ref()));
			match removed {
				Some((_, entry)) => self.tear_down(entry).await.map(|()| true),
				None => Ok(false),
			}
		};
		self.forget_lock(key, &lock);
		result
	}

	async fn tear_down(&self, entry: Arc<Entry>) -> Result<()> {
		let inner = &self.inner;
		let key = &entry.key;
		entry.relay.shutdown().await;
		entry.input_pump.abort();

		let stop_timeout = inner.config.stop_timeout();
		let stopped = match timeout(stop_timeout, inner.runner.stop(key)).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(source)) => Err(Error::CommandRunner {
				key: key.clone(),
				op: "stop",
				source,
			}),
			Err(_) => Err(Error::StopTimeout {
				key: key.clone(),
				timeout: stop_timeout,
			}),
		};

		inner.ports.release(entry.port);
		match &stopped {
			Ok(()) => info!(target = "tabcast.registry", session = %key, port = entry.port, "browser session closed"),
			Err(err) => warn!(target = "tabcast.registry", session = %key, port = entry.port, error = %err, "browser session closed, stop failed"),
		}
		stopped
	}

	pub fn get(&self, key: &SessionKey) -> Option<Session> {
		self.inner.sessions.get(key).map(|entry| entry.snapshot())
	}

	/// Snapshot of every live session, ordered by key.
	pub fn list_active(&self) -> Vec<Session> {
		let mut sessions: Vec<Session> = self.inner.sessions.iter().map(|entry| entry.snapshot()).collect();
		sessions.sort_by(|a, b| a.key.cmp(&b.key));
		sessions
	}

	pub fn len(&self) -> usize {
		self.inner.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.sessions.is_empty()
	}

	fn entry(&self, key: &SessionKey) -> Result<Arc<Entry>> {
		self.inner
			.sessions
			.get(key)
			.map(|entry| Arc::clone(entry.value()))
			.ok_or_else(|| Error::UnknownSession(key.clone()))
	}

	/// Pushes a frame to the session's viewers.
	pub fn publish_frame(&self, key: &SessionKey, frame: StreamFrame) -> Result<()> {
		self.entry(key)?.relay.publish_frame(frame);
		Ok(())
	}

	pub fn attach_viewer(&self, key: &SessionKey) -> Result<ViewerHandle> {
		self.entry(key)?.relay.attach_viewer()
	}

	/// Forwards a viewer input event to the session's browser and records activity.
	pub fn submit_input(&self, key: &SessionKey, event: InputEvent) -> Result<()> {
		self.entry(key)?.relay.submit_input_event(event)
	}

	/// Runs a driver action against the session, starting it first if necessary.
	pub async fn execute(&self, key: &SessionKey, args: &[String]) -> Result<CommandOutput> {
		self.ensure_active(key).await?;
		let command_timeout = self.inner.config.command_timeout();
		let result = timeout(command_timeout, self.inner.runner.execute(key, args)).await;
		self.touch(key);
		match result {
			Ok(Ok(output)) => Ok(output),
			Ok(Err(source)) => Err(Error::CommandRunner {
				key: key.clone(),
				op: "execute",
				source,
			}),
			Err(_) => Err(Error::CommandTimeout {
				key: key.clone(),
				timeout: command_timeout,
			}),
		}
	}

	/// Closes every session. Failures are logged.
	pub async fn shutdown(&self) {
		let keys: Vec<SessionKey> = self.inner.sessions.iter().map(|entry| entry.key().clone()).collect();
		if keys.is_empty() {
			return;
		}
		info!(target = "tabcast.registry", sessions = keys.len(), "closing all sessions");
		let results = join_all(keys.iter().map(|key| self.close(key))).await;
		for (key, result) in keys.iter().zip(results) {
			if let Err(err) = result {
				warn!(target = "tabcast.registry", session = %key, error = %err, "error closing session during shutdown");
			}
		}
	}

	/// Starts the idle reaper for this registry. Only the first call starts one.
	pub fn spawn_reaper(&self) -> Option<ReaperHandle> {
		if self.inner.reaper_started.swap(true, Ordering::AcqRel) {
			debug!(target = "tabcast.reaper", "idle reaper already running");
			return None;
		}
		Some(reaper::spawn(self.clone(), self.inner.config.reaper_interval()))
	}

	/// Runs one reaper pass: closes every session idle past the configured timeout.
	/// Returns the keys that were closed.
	pub async fn reap_idle(&self) -> Vec<SessionKey> {
		let idle_timeout = self.inner.config.idle_timeout();
		let candidates: Vec<SessionKey> = self
			.list_active()
			.into_iter()
			.filter(|session| session.idle_for() > idle_timeout)
			.map(|session| session.key)
			.collect();

		let mut closed = Vec::with_capacity(candidates.len());
		for key in candidates {
			match self.close_if_idle(&key, idle_timeout).await {
				Ok(true) => {
					info!(target = "tabcast.reaper", session = %key, "closed idle session");
					closed.push(key);
				}
				Ok(false) => debug!(target = "tabcast.reaper", session = %key, "session became active, skipped"),
				Err(err) => {
					warn!(target = "tabcast.reaper", session = %key, error = %err, "failed to close idle session cleanly");
					closed.push(key);
				}
			}
		}
		closed
	}

	fn key_lock(&self, key: &SessionKey) -> KeyLock {
		Arc::clone(self.inner.locks.entry(key.clone()).or_default().value())
	}

	/// Drops the per-key lock once nobody else holds or waits on it.
	fn forget_lock(&self, key: &SessionKey, lock: &KeyLock) {
		// One reference is `lock`, the other is the map's.
		self.inner.locks.remove_if(key, |_, held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) <= 2);
	}
}

fn spawn_input_pump(runner: Arc<dyn CommandRunner>, key: SessionKey, mut input_rx: InputReceiver) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(event) = input_rx.recv().await {
			let kind = event.kind_name();
			if let Err(err) = runner.send_input(&key, event).await {
				warn!(target = "tabcast.registry", session = %key, kind, error = %err, "failed to forward input to browser");
			}
		}
	})
}
