//! Error types for session management and streaming.

use std::time::Duration;

use thiserror::Error;

use crate::runner::RunnerError;
use crate::session::SessionKey;

/// Result type alias for registry and relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session registry, port allocator, and stream relay.
#[derive(Debug, Error)]
pub enum Error {
	/// Every port in the configured range is held by a live session.
	#[error("no free stream port in range starting at {base} ({range} ports, all held)")]
	ExhaustedPortRange { base: u16, range: u16 },

	/// The command runner did not confirm start-up in time. The session was rolled back.
	#[error("session '{key}' did not start within {}ms", .timeout.as_millis())]
	StartupTimeout { key: SessionKey, timeout: Duration },

	/// The command runner did not confirm shutdown in time. The port was still released.
	#[error("session '{key}' did not stop within {}ms", .timeout.as_millis())]
	StopTimeout { key: SessionKey, timeout: Duration },

	/// A driver action did not finish in time.
	#[error("command for session '{key}' timed out after {}ms", .timeout.as_millis())]
	CommandTimeout { key: SessionKey, timeout: Duration },

	/// Upstream failure reported by the command runner.
	#[error("command runner failed to {op} session '{key}': {source}")]
	CommandRunner {
		key: SessionKey,
		op: &'static str,
		#[source]
		source: RunnerError,
	},

	/// The operation needs a live session and none exists for the key.
	#[error("no active session for key '{0}'")]
	UnknownSession(SessionKey),

	/// The stream endpoint for a session could not be bound.
	#[error("failed to bind stream endpoint on port {port}: {source}")]
	Bind {
		port: u16,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid session key: {0}")]
	InvalidKey(String),

	/// The session's input queue is full; the browser is not keeping up.
	#[error("input queue for session '{0}' is full")]
	InputBacklog(SessionKey),

	/// A viewer input event the browser driver cannot act on.
	#[error("invalid input event: {0}")]
	InvalidInput(String),

	#[error("invalid configuration: {0}")]
	Config(String),
}

impl Error {
	/// Stable machine-readable code, used by the CLI envelope and RPC error data.
	pub fn code(&self) -> &'static str {
		match self {
			Error::ExhaustedPortRange { .. } => "PORT_RANGE_EXHAUSTED",
			Error::StartupTimeout { .. } => "STARTUP_TIMEOUT",
			Error::StopTimeout { .. } => "STOP_TIMEOUT",
			Error::CommandTimeout { .. } => "COMMAND_TIMEOUT",
			Error::CommandRunner { .. } => "RUNNER_FAILED",
			Error::UnknownSession(_) => "UNKNOWN_SESSION",
			Error::Bind { .. } => "BIND_FAILED",
			Error::InvalidKey(_) => "INVALID_KEY",
			Error::InputBacklog(_) => "INPUT_BACKLOG",
			Error::InvalidInput(_) => "INVALID_INPUT",
			Error::Config(_) => "INVALID_CONFIG",
		}
	}

	/// Whether retrying the same call later can succeed without operator action.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Error::ExhaustedPortRange { .. } | Error::StartupTimeout { .. } | Error::CommandRunner { .. } | Error::Bind { .. } | Error::CommandTimeout { .. } | Error::InputBacklog(_)
		)
	}
}
