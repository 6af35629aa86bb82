//! Session control payloads returned by the daemon's RPC surface.

use serde::{Deserialize, Serialize};

/// Point-in-time description of a live browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
	/// Caller-supplied session key (usually a conversation thread id).
	pub key: String,
	/// Port the session's viewport stream is served on.
	pub port: u16,
	pub active: bool,
	/// WebSocket URL viewers connect to, e.g. `ws://localhost:9417/`.
	pub stream_url: String,
	pub viewer_count: usize,
	pub capturing: bool,
	pub viewport_width: u32,
	pub viewport_height: u32,
	/// Creation time in milliseconds since the Unix epoch.
	pub created_at_ms: u64,
	/// Last browser-affecting interaction, milliseconds since the Unix epoch.
	pub last_activity_at_ms: u64,
	/// Milliseconds since the last interaction at the time of the snapshot.
	pub idle_ms: u64,
}

/// Result of running a driver action for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
	pub success: bool,
	pub stdout: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub stderr: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exit_code: Option<i32>,
}

impl CommandOutput {
	pub fn ok(stdout: impl Into<String>) -> Self {
		Self {
			success: true,
			stdout: stdout.into(),
			stderr: String::new(),
			exit_code: Some(0),
		}
	}
}
