//! The seam between the session registry and whatever actually drives a browser.

use async_trait::async_trait;
use tabcast_protocol::{CommandOutput, InputEvent, Viewport};
use thiserror::Error;

use crate::relay::FramePublisher;
use crate::session::SessionKey;

/// Failure reported by a [`CommandRunner`].
#[derive(Debug, Error)]
pub enum RunnerError {
	/// The driver ran but reported an error.
	#[error("{0}")]
	Failed(String),

	/// The runner does not implement the requested operation.
	#[error("operation not supported by this runner")]
	Unsupported,

	/// No browser is running for the session on the runner's side.
	#[error("no browser running for this session")]
	NotRunning,

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

impl RunnerError {
	pub fn failed(msg: impl Into<String>) -> Self {
		Self::Failed(msg.into())
	}
}

/// Where the runner should deliver captured frames for a session.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
	/// Port the session's viewer endpoint is served on.
	pub port: u16,
	pub publisher: FramePublisher,
}

/// What the runner reports once a session's browser is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
	pub viewport: Viewport,
	/// Whether frames are already flowing. A browser may come up before capture starts.
	pub capturing: bool,
	/// Upstream address the runner reads frames from, if any. Informational.
	pub upstream: Option<String>,
}

impl Default for StreamEndpoint {
	fn default() -> Self {
		Self {
			viewport: Viewport::default(),
			capturing: false,
			upstream: None,
		}
	}
}

/// Starts, stops, and drives the browser behind each session.
///
/// Implementations must tolerate `stop` for a session that never started or already
/// stopped. `start` is called at most once per live session; the registry serializes
/// start and stop for the same key.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
	/// Launches (or attaches to) the browser for `key` and begins capturing frames into
	/// `target.publisher`.
	async fn start(&self, key: &SessionKey, target: CaptureTarget) -> Result<StreamEndpoint, RunnerError>;

	async fn stop(&self, key: &SessionKey) -> Result<(), RunnerError>;

	/// Forwards a viewer input event to the browser.
	async fn send_input(&self, key: &SessionKey, event: InputEvent) -> Result<(), RunnerError>;

	/// Runs an arbitrary driver action (navigate, click, fill, ...).
	async fn execute(&self, key: &SessionKey, args: &[String]) -> Result<CommandOutput, RunnerError> {
		let _ = (key, args);
		Err(RunnerError::Unsupported)
	}
}
