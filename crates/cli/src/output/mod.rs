//! Result envelope printed by every command.
//!
//! ```json
//! { "ok": true, "command": "session ensure", "data": { ... }, "timings": { "durationMs": 12 } }
//! ```
//!
//! On failure:
//!
//! ```json
//! { "ok": false, "command": "session ensure", "error": { "code": "PORT_RANGE_EXHAUSTED", "message": "..." } }
//! ```


use std::io::{self, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// JSON envelope (default, for agents and scripts)
	#[default]
	Json,
	/// Human-readable text
	Text,
}

impl std::str::FromStr for OutputFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"json" => Ok(OutputFormat::Json),
			"text" => Ok(OutputFormat::Text),
			_ => Err(format!("unknown format: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Stable error codes shared by the envelope and the daemon's RPC error data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	PortRangeExhausted,
	StartupTimeout,
	StopTimeout,
	CommandTimeout,
	RunnerFailed,
	UnknownSession,
	BindFailed,
	InvalidKey,
	InputBacklog,
	InvalidInput,
	InvalidConfig,
	DaemonNotRunning,
	DaemonAlreadyRunning,
	RpcFailed,
	ConnectionLost,
	InvalidArgument,
	IoError,
	InternalError,
}

impl ErrorCode {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCode::PortRangeExhausted => "PORT_RANGE_EXHAUSTED",
			ErrorCode::StartupTimeout => "STARTUP_TIMEOUT",
			ErrorCode::StopTimeout => "STOP_TIMEOUT",
			ErrorCode::CommandTimeout => "COMMAND_TIMEOUT",
			ErrorCode::RunnerFailed => "RUNNER_FAILED",
			ErrorCode::UnknownSession => "UNKNOWN_SESSION",
			ErrorCode::BindFailed => "BIND_FAILED",
			ErrorCode::InvalidKey => "INVALID_KEY",
			ErrorCode::InputBacklog => "INPUT_BACKLOG",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::InvalidConfig => "INVALID_CONFIG",
			ErrorCode::DaemonNotRunning => "DAEMON_NOT_RUNNING",
			ErrorCode::DaemonAlreadyRunning => "DAEMON_ALREADY_RUNNING",
			ErrorCode::RpcFailed => "RPC_FAILED",
			ErrorCode::ConnectionLost => "CONNECTION_LOST",
			ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		}
	}

	/// Maps a code string (from a core error or RPC error data) back to a variant.
	pub fn from_code(code: &str) -> Option<Self> {
		const ALL: [ErrorCode; 18] = [
			ErrorCode::PortRangeExhausted,
			ErrorCode::StartupTimeout,
			ErrorCode::StopTimeout,
			ErrorCode::CommandTimeout,
			ErrorCode::RunnerFailed,
			ErrorCode::UnknownSession,
			ErrorCode::BindFailed,
			ErrorCode::InvalidKey,
			ErrorCode::InputBacklog,
			ErrorCode::InvalidInput,
			ErrorCode::InvalidConfig,
			ErrorCode::DaemonNotRunning,
			ErrorCode::DaemonAlreadyRunning,
			ErrorCode::RpcFailed,
			ErrorCode::ConnectionLost,
			ErrorCode::InvalidArgument,
			ErrorCode::IoError,
			ErrorCode::InternalError,
		];
		ALL.into_iter().find(|c| c.as_str() == code)
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(d: Duration) -> Self {
		Self {
			duration_ms: u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
		}
	}
}

pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	timings: Option<Timings>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			timings: None,
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn command_error(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn duration(mut self, elapsed: Duration) -> Self {
		self.timings = Some(elapsed.into());
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			ok: self.error.is_none(),
			command: self.command,
			data: self.data,
			error: self.error,
			timings: self.timings,
		}
	}
}

pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	let rendered = match format {
		OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{e}"}}"#)),
		OutputFormat::Text => render_text(result),
	};
	let mut stdout = io::stdout().lock();
	let _ = writeln!(stdout, "{rendered}");
}

/// Writes a single-line JSON event, used by streaming commands.
pub fn print_event(event: &serde_json::Value) {
	let mut stdout = io::stdout().lock();
	let _ = writeln!(stdout, "{event}");
	let _ = stdout.flush();
}

pub fn print_error_stderr(error: &CommandError) {
	eprintln!("error[{}]: {}", error.code, error.message);
}

fn render_text<T: Serialize>(result: &CommandResult<T>) -> String {
	if let Some(error) = &result.error {
		return format!("{} failed: {} ({})", result.command, error.message, error.code);
	}
	match result.data.as_ref().map(serde_json::to_value) {
		Some(Ok(serde_json::Value::String(s))) => s,
		Some(Ok(serde_json::Value::Null)) | None => format!("{}: ok", result.command),
		Some(Ok(value)) => serde_json::to_string_pretty(&value).unwrap_or_default(),
		Some(Err(e)) => format!("{}: unable to render result: {e}", result.command),
	}
}
