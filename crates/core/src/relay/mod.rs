//! Per-session fan-out of captured frames to viewers, and input back to the browser.
//!
//! A [`StreamRelay`] exists for every active session. The command runner pushes
//! frames through a [`FramePublisher`]; each attached viewer reads from its own
//! bounded queue through a [`ViewerHandle`]. Slow viewers lose their oldest frames
//! instead of slowing the producer or other viewers.

mod queue;
mod server;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
pub use queue::ViewerMessage;
use queue::ViewerQueue;
use tabcast_protocol::{InputEvent, StatusMessage, StreamFrame, Viewport};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::session::{ActivityClock, SessionKey};

/// Receiving side of a relay's input channel, drained by the session's input pump.
pub type InputReceiver = mpsc::Receiver<InputEvent>;

/// Input events a relay buffers for the browser before rejecting more.
pub const INPUT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle of one viewer connection. A reconnect creates a fresh viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
	/// Registered, initial status not yet read.
	Connecting,
	Attached,
	Detached,
}

#[derive(Debug, Clone, Copy)]
struct RelayStatus {
	capturing: bool,
	viewport: Viewport,
}

pub(crate) struct RelayShared {
	key: SessionKey,
	port: u16,
	capacity: usize,
	status: Mutex<RelayStatus>,
	viewers: DashMap<u64, Arc<ViewerQueue>>,
	next_viewer_id: AtomicU64,
	frames_published: AtomicU64,
	activity: Arc<ActivityClock>,
	input_tx: mpsc::Sender<InputEvent>,
	closed: AtomicBool,
}

impl RelayShared {
	fn current_status(&self) -> StatusMessage {
		let status = self.status.lock();
		StatusMessage::new(status.capturing, status.viewport)
	}

	fn attach(self: &Arc<Self>) -> Result<ViewerHandle> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::UnknownSession(self.key.clone()));
		}
		let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
		let queue = Arc::new(ViewerQueue::new(self.capacity, self.current_status()));
		self.viewers.insert(id, Arc::clone(&queue));
		// A shutdown that raced the insert would have missed this queue.
		if self.closed.load(Ordering::Acquire) {
			self.viewers.remove(&id);
			return Err(Error::UnknownSession(self.key.clone()));
		}
		debug!(target = "tabcast.relay", session = %self.key, viewer = id, viewers = self.viewers.len(), "viewer attached");
		Ok(ViewerHandle {
			id,
			queue,
			relay: Arc::downgrade(self),
			greeted: false,
			detached: false,
		})
	}

	fn detach(&self, id: u64) -> bool {
		let removed = self.viewers.remove(&id).is_some();
		if removed {
			debug!(target = "tabcast.relay", session = %self.key, viewer = id, viewers = self.viewers.len(), "viewer detached");
		}
		removed
	}

	fn publish(&self, frame: StreamFrame) -> usize {
		if self.closed.load(Ordering::Acquire) {
			return 0;
		}
		{
			let mut status = self.status.lock();
			status.viewport = frame.metadata.viewport();
			status.capturing = true;
		}
		self.frames_published.fetch_add(1, Ordering::Relaxed);
		let frame = Arc::new(frame);
		let mut delivered = 0;
		for viewer in self.viewers.iter() {
			if viewer.value().push_frame(Arc::clone(&frame)) {
				trace!(target = "tabcast.relay", session = %self.key, viewer = *viewer.key(), "viewer lagging, dropped oldest frame");
			}
			delivered += 1;
		}
		delivered
	}

	fn set_status(&self, capturing: bool, viewport: Viewport) {
		if self.closed.load(Ordering::Acquire) {
			return;
		}
		*self.status.lock() = RelayStatus { capturing, viewport };
		let message = StatusMessage::new(capturing, viewport);
		for viewer in self.viewers.iter() {
			viewer.value().set_status(message);
		}
	}

	fn submit_input(&self, event: InputEvent) -> Result<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::UnknownSession(self.key.clone()));
		}
		event.validate().map_err(Error::InvalidInput)?;
		self.activity.touch();
		trace!(target = "tabcast.relay", session = %self.key, kind = event.kind_name(), "input queued");
		self.input_tx.try_send(event).map_err(|err| match err {
			mpsc::error::TrySendError::Full(_) => Error::InputBacklog(self.key.clone()),
			mpsc::error::TrySendError::Closed(_) => Error::UnknownSession(self.key.clone()),
		})
	}

	fn close(&self) -> bool {
		if self.closed.swap(true, Ordering::AcqRel) {
			return false;
		}
		for viewer in self.viewers.iter() {
			viewer.value().close();
		}
		self.viewers.clear();
		true
	}
}

/// Stream relay for one session.
pub struct StreamRelay {
	shared: Arc<RelayShared>,
	server: Mutex<Option<server::ServerTask>>,
}

impl std::fmt::Debug for StreamRelay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamRelay")
			.field("key", &self.shared.key)
			.field("port", &self.shared.port)
			.field("viewers", &self.shared.viewers.len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl StreamRelay {
	/// Creates a relay and the receiver its input pump should drain.
	///
	/// Input submitted through the relay touches `activity` before it is queued.
	pub fn new(key: SessionKey, port: u16, capacity: usize, activity: Arc<ActivityClock>) -> (Self, InputReceiver) {
		let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
		let shared = Arc::new(RelayShared {
			key,
			port,
			capacity: capacity.max(1),
			status: Mutex::new(RelayStatus {
				capturing: false,
				viewport: Viewport::default(),
			}),
			viewers: DashMap::new(),
			next_viewer_id: AtomicU64::new(1),
			frames_published: AtomicU64::new(0),
			activity,
			input_tx,
			closed: AtomicBool::new(false),
		});
		let relay = Self {
			shared,
			server: Mutex::new(None),
		};
		(relay, input_rx)
	}

	pub fn key(&self) -> &SessionKey {
		&self.shared.key
	}

	pub fn port(&self) -> u16 {
		self.shared.port
	}

	/// Binds the viewer WebSocket endpoint on `host` and the relay's port.
	pub async fn bind(&self, host: &str) -> Result<SocketAddr> {
		let task = server::serve(Arc::clone(&self.shared), host).await?;
		let addr = task.addr;
		if let Some(previous) = self.server.lock().replace(task) {
			previous.abort();
		}
		Ok(addr)
	}

	/// Address the viewer endpoint is listening on, if bound.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.server.lock().as_ref().map(|task| task.addr)
	}

	/// Registers a viewer. Its first message is always the current status.
	pub fn attach_viewer(&self) -> Result<ViewerHandle> {
		self.shared.attach()
	}

	/// Unregisters a viewer. Detaching twice is harmless.
	pub fn detach_viewer(&self, handle: &mut ViewerHandle) {
		handle.detach();
	}

	pub fn viewer_count(&self) -> usize {
		self.shared.viewers.len()
	}

	/// Delivers a frame to every attached viewer and returns how many received it.
	pub fn publish_frame(&self, frame: StreamFrame) -> usize {
		self.shared.publish(frame)
	}

	pub fn set_status(&self, capturing: bool, viewport: Viewport) {
		self.shared.set_status(capturing, viewport);
	}

	/// The status a newly attached viewer would receive.
	pub fn status(&self) -> StatusMessage {
		self.shared.current_status()
	}

	pub fn frames_published(&self) -> u64 {
		self.shared.frames_published.load(Ordering::Relaxed)
	}

	/// Records activity and queues the event for the command runner.
	pub fn submit_input_event(&self, event: InputEvent) -> Result<()> {
		self.shared.submit_input(event)
	}

	/// Producer handle for the command runner.
	pub fn publisher(&self) -> FramePublisher {
		FramePublisher {
			relay: Arc::downgrade(&self.shared),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::Acquire)
	}

	/// Disconnects every viewer and stops the endpoint. Safe to call more than once.
	pub async fn shutdown(&self) {
		let first = self.shared.close();
		let task = self.server.lock().take();
		if let Some(task) = task {
			task.stop().await;
		}
		if first {
			debug!(target = "tabcast.relay", session = %self.shared.key, port = self.shared.port, "relay shut down");
		}
	}
}

impl Drop for StreamRelay {
	fn drop(&mut self) {
		self.shared.close();
		if let Some(task) = self.server.get_mut().take() {
			task.abort();
		}
	}
}

/// Cloneable producer handle handed to the command runner.
///
/// Holds the relay weakly: publishing after the session closed is a no-op.
#[derive(Debug, Clone)]
pub struct FramePublisher {
	relay: Weak<RelayShared>,
}

impl FramePublisher {
	/// A publisher attached to nothing.
	pub fn detached() -> Self {
		Self { relay: Weak::new() }
	}

	/// Returns `false` once the relay is gone.
	pub fn publish(&self, frame: StreamFrame) -> bool {
		match self.relay.upgrade() {
			Some(relay) if !relay.closed.load(Ordering::Acquire) => {
				relay.publish(frame);
				true
			}
			_ => false,
		}
	}

	pub fn set_status(&self, capturing: bool, viewport: Viewport) -> bool {
		match self.relay.upgrade() {
			Some(relay) if !relay.closed.load(Ordering::Acquire) => {
				relay.set_status(capturing, viewport);
				true
			}
			_ => false,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.relay.upgrade().is_none_or(|relay| relay.closed.load(Ordering::Acquire))
	}
}

/// A viewer's subscription to a relay. Dropping it detaches the viewer.
#[derive(Debug)]
pub struct ViewerHandle {
	id: u64,
	queue: Arc<ViewerQueue>,
	relay: Weak<RelayShared>,
	greeted: bool,
	detached: bool,
}

impl ViewerHandle {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn state(&self) -> ViewerState {
		if self.detached || self.queue.is_closed() {
			ViewerState::Detached
		} else if self.greeted {
			ViewerState::Attached
		} else {
			ViewerState::Connecting
		}
	}

	/// Waits for the next message. `None` means the relay closed or the viewer detached.
	pub async fn recv(&mut self) -> Option<ViewerMessage> {
		let message = self.queue.pop().await;
		self.greeted |= message.is_some();
		message
	}

	pub fn try_recv(&mut self) -> Option<ViewerMessage> {
		let message = self.queue.try_pop();
		self.greeted |= message.is_some();
		message
	}

	/// Frames discarded because this viewer fell behind.
	pub fn dropped(&self) -> u64 {
		self.queue.dropped()
	}

	/// Frames waiting to be read.
	pub fn backlog(&self) -> usize {
		self.queue.len()
	}

	/// Sends an input event to the session this viewer is watching.
	pub fn submit_input(&self, event: InputEvent) -> Result<()> {
		match self.relay.upgrade() {
			Some(relay) if !self.detached => relay.submit_input(event),
			Some(relay) => Err(Error::UnknownSession(relay.key.clone())),
			None => Err(Error::InvalidInput("viewer is detached".to_string())),
		}
	}

	pub fn detach(&mut self) {
		if self.detached {
			return;
		}
		self.detached = true;
		self.queue.close();
		if let Some(relay) = self.relay.upgrade() {
			relay.detach(self.id);
		}
	}
}

impl Drop for ViewerHandle {
	fn drop(&mut self) {
		self.detach();
	}
}
