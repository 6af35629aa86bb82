use std::net::SocketAddr;

use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Session(#[from] tabcast::Error),

	#[error("daemon is not running at {addr} (start it with `tabcast serve`)")]
	DaemonNotRunning { addr: SocketAddr },

	#[error("daemon already running at {addr} (stop it with `tabcast stop`)")]
	DaemonAlreadyRunning { addr: SocketAddr },

	/// The daemon answered with an error. `code` is the daemon's error code, when it sent one.
	#[error("{message}")]
	Rpc { code: Option<ErrorCode>, message: String },

	#[error("stream connection lost after {attempts} reconnect attempts")]
	ConnectionLost { attempts: u32 },

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),

	/// The command already printed its own failure envelope.
	#[error("{0}")]
	OutputPrinted(String),
}

impl CliError {
	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, CliError::OutputPrinted(_))
	}

	/// Converts this error to the structured form printed in the result envelope.
	pub fn to_command_error(&self) -> CommandError {
		let (code, details) = match self {
			CliError::Session(err) => (
				ErrorCode::from_code(err.code()).unwrap_or(ErrorCode::InternalError),
				Some(serde_json::json!({ "retryable": err.is_retryable() })),
			),
			CliError::DaemonNotRunning { addr } => (ErrorCode::DaemonNotRunning, Some(serde_json::json!({ "addr": addr.to_string() }))),
			CliError::DaemonAlreadyRunning { addr } => (ErrorCode::DaemonAlreadyRunning, Some(serde_json::json!({ "addr": addr.to_string() }))),
			CliError::Rpc { code, .. } => (code.unwrap_or(ErrorCode::RpcFailed), None),
			CliError::ConnectionLost { attempts } => (ErrorCode::ConnectionLost, Some(serde_json::json!({ "attempts": attempts }))),
			CliError::InvalidArgument(_) => (ErrorCode::InvalidArgument, None),
			CliError::Io(_) => (ErrorCode::IoError, None),
			CliError::OutputPrinted(_) => (ErrorCode::RunnerFailed, None),
			CliError::Json(_) | CliError::Anyhow(_) => (ErrorCode::InternalError, None),
		};

		CommandError {
			code,
			message: self.to_string(),
			details,
		}
	}
}

#[cfg(test)]
mod tests {
	use tabcast::SessionKey;

	use super::*;

	#[test]
	fn core_errors_keep_their_codes() {
		let err = CliError::from(tabcast::Error::ExhaustedPortRange { base: 9223, range: 1000 });
		let cmd = err.to_command_error();
		assert_eq!(cmd.code, ErrorCode::PortRangeExhausted);
		assert_eq!(cmd.details, Some(serde_json::json!({ "retryable": true })));

		let err = CliError::from(tabcast::Error::UnknownSession(SessionKey::new("gone").unwrap()));
		assert_eq!(err.to_command_error().code, ErrorCode::UnknownSession);
	}

	#[test]
	fn rpc_error_without_code_is_rpc_failed() {
		let err = CliError::Rpc {
			code: None,
			message: "boom".to_string(),
		};
		let cmd = err.to_command_error();
		assert_eq!(cmd.code, ErrorCode::RpcFailed);
		assert_eq!(cmd.message, "boom");
	}

	#[test]
	fn daemon_not_running_mentions_serve() {
		let err = CliError::DaemonNotRunning {
			addr: "127.0.0.1:19223".parse().unwrap(),
		};
		assert!(err.to_string().contains("tabcast serve"));
		assert_eq!(err.to_command_error().code, ErrorCode::DaemonNotRunning);
	}
}
