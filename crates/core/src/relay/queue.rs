//! Bounded per-viewer delivery queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tabcast_protocol::{StatusMessage, StreamFrame};
use tokio::sync::Notify;

/// An item delivered to a single viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerMessage {
	Status(StatusMessage),
	Frame(Arc<StreamFrame>),
}

#[derive(Debug)]
struct QueueState {
	/// Pending status, delivered ahead of any queued frame and never dropped.
	status: Option<StatusMessage>,
	frames: VecDeque<Arc<StreamFrame>>,
	dropped: u64,
	closed: bool,
}

/// Single-consumer queue that keeps the newest `capacity` frames.
///
/// Pushing never blocks: when the queue is full the oldest frame is discarded and
/// counted in [`ViewerQueue::dropped`].
#[derive(Debug)]
pub(crate) struct ViewerQueue {
	state: Mutex<QueueState>,
	notify: Notify,
	capacity: usize,
}

impl ViewerQueue {
	pub(crate) fn new(capacity: usize, initial_status: StatusMessage) -> Self {
		Self {
			state: Mutex::new(QueueState {
				status: Some(initial_status),
				frames: VecDeque::with_capacity(capacity.max(1)),
				dropped: 0,
				closed: false,
			}),
			notify: Notify::new(),
			capacity: capacity.max(1),
		}
	}

	/// Returns `true` if an older frame had to be dropped to make room.
	pub(crate) fn push_frame(&self, frame: Arc<StreamFrame>) -> bool {
		let evicted = {
			let mut state = self.state.lock();
			if state.closed {
				return false;
			}
			let evicted = if state.frames.len() >= self.capacity {
				state.frames.pop_front();
				state.dropped += 1;
				true
			} else {
				false
			};
			state.frames.push_back(frame);
			evicted
		};
		self.notify.notify_one();
		evicted
	}

	pub(crate) fn set_status(&self, status: StatusMessage) {
		{
			let mut state = self.state.lock();
			if state.closed {
				return;
			}
			state.status = Some(status);
		}
		self.notify.notify_one();
	}

	/// Marks the queue closed. Items already queued remain readable.
	pub(crate) fn close(&self) {
		self.state.lock().closed = true;
		self.notify.notify_one();
	}

	pub(crate) fn try_pop(&self) -> Option<ViewerMessage> {
		let mut state = self.state.lock();
		if let Some(status) = state.status.take() {
			return Some(ViewerMessage::Status(status));
		}
		state.frames.pop_front().map(ViewerMessage::Frame)
	}

	/// Waits for the next item. Returns `None` once the queue is closed and drained.
	///
	/// Cancel safe: an item is only removed when it is returned.
	pub(crate) async fn pop(&self) -> Option<ViewerMessage> {
		loop {
			{
				let mut state = self.state.lock();
				if let Some(status) = state.status.take() {
					return Some(ViewerMessage::Status(status));
				}
				if let Some(frame) = state.frames.pop_front() {
					return Some(ViewerMessage::Frame(frame));
				}
				if state.closed {
					return None;
				}
			}
			self.notify.notified().await;
		}
	}

	pub(crate) fn dropped(&self) -> u64 {
		self.state.lock().dropped
	}

	pub(crate) fn len(&self) -> usize {
		self.state.lock().frames.len()
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.state.lock().closed
	}
}

#[cfg(test)]
mod tests {
	use tabcast_protocol::{FrameMetadata, Viewport};

	use super::*;

	fn frame(n: u64) -> Arc<StreamFrame> {
		Arc::new(StreamFrame::new(format!("f{n}"), FrameMetadata::for_viewport(Viewport::default()), n))
	}

	fn status(capturing: bool) -> StatusMessage {
		StatusMessage::new(capturing, Viewport::default())
	}

	#[test]
	fn drops_oldest_when_full() {
		let queue = ViewerQueue::new(2, status(false));
		assert!(!queue.push_frame(frame(1)));
		assert!(!queue.push_frame(frame(2)));
		assert!(queue.push_frame(frame(3)));
		assert_eq!(queue.dropped(), 1);
		assert_eq!(queue.try_pop(), Some(ViewerMessage::Status(status(false))));
		assert_eq!(queue.try_pop(), Some(ViewerMessage::Frame(frame(2))));
		assert_eq!(queue.try_pop(), Some(ViewerMessage::Frame(frame(3))));
		assert_eq!(queue.try_pop(), None);
	}

	#[test]
	fn newer_status_replaces_unread_status() {
		let queue = ViewerQueue::new(4, status(false));
		queue.push_frame(frame(1));
		queue.set_status(status(true));
		assert_eq!(queue.try_pop(), Some(ViewerMessage::Status(status(true))));
		assert_eq!(queue.try_pop(), Some(ViewerMessage::Frame(frame(1))));
	}

	#[tokio::test]
	async fn pop_drains_then_reports_close() {
		let queue = Arc::new(ViewerQueue::new(4, status(true)));
		queue.push_frame(frame(1));
		queue.close();
		assert!(!queue.push_frame(frame(2)));
		assert!(matches!(queue.pop().await, Some(ViewerMessage::Status(_))));
		assert!(matches!(queue.pop().await, Some(ViewerMessage::Frame(_))));
		assert_eq!(queue.pop().await, None);
	}

	#[tokio::test]
	async fn pop_wakes_on_push() {
		let queue = Arc::new(ViewerQueue::new(4, status(true)));
		assert!(queue.try_pop().is_some());
		let waiter = {
			let queue = Arc::clone(&queue);
			tokio::spawn(async move { queue.pop().await })
		};
		tokio::task::yield_now().await;
		queue.push_frame(frame(7));
		assert_eq!(waiter.await.unwrap(), Some(ViewerMessage::Frame(frame(7))));
	}
}
