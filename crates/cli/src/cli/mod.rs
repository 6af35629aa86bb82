use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[cfg(test)]
mod tests;

#[derive(Parser, Debug)]
#[command(name = "tabcast")]
#[command(about = "Browser sessions with live viewport streaming for chat-driven agents")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: json (default) or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	/// Daemon control address (JSON-RPC over HTTP)
	#[arg(long, global = true, value_name = "ADDR")]
	pub control: Option<SocketAddr>,

	#[command(subcommand)]
	pub command: Commands,
}

impl Cli {
	/// Control address to talk to, honoring `--control`.
	pub fn control_addr(&self) -> SocketAddr {
		self.control.unwrap_or_else(default_control_addr)
	}
}

pub fn default_control_addr() -> SocketAddr {
	SocketAddr::from(([127, 0, 0, 1], 19223))
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the session daemon in the foreground
	Serve(ServeArgs),

	/// Manage browser sessions through the running daemon
	#[command(subcommand)]
	Session(SessionAction),

	/// Check whether the daemon is running
	Status,

	/// Close every session and stop the daemon
	Stop,

	/// Watch a session's live stream in the terminal
	Watch(WatchArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
	/// JSON config file (default: <config dir>/tabcast/config.json when present)
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// First port of the per-session stream range
	#[arg(long, value_name = "PORT")]
	pub base_port: Option<u16>,

	/// Number of ports in the stream range
	#[arg(long, value_name = "N")]
	pub port_range: Option<u16>,

	/// Seconds without interaction before a session is reclaimed
	#[arg(long, value_name = "SECS")]
	pub idle_timeout: Option<u64>,

	/// Seconds between idle sweeps
	#[arg(long, value_name = "SECS")]
	pub reaper_interval: Option<u64>,

	/// Seconds to wait for a browser to start
	#[arg(long, value_name = "SECS")]
	pub startup_timeout: Option<u64>,

	/// Frames buffered per viewer before the oldest is dropped
	#[arg(long, value_name = "N")]
	pub viewer_queue: Option<usize>,

	/// Interface stream endpoints bind to
	#[arg(long, value_name = "HOST")]
	pub bind_host: Option<String>,

	/// Host name written into stream URLs
	#[arg(long, value_name = "HOST")]
	pub advertised_host: Option<String>,

	/// Attach to an existing browser's CDP port instead of per-session browsers
	#[arg(long, value_name = "PORT")]
	pub cdp_port: Option<u16>,

	/// Browser driver executable
	#[arg(long, value_name = "PROGRAM")]
	pub driver: Option<String>,

	/// Offset from a session's port to the driver's own stream server
	#[arg(long, value_name = "N")]
	pub upstream_port_offset: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
	/// Start the session for KEY if needed and print it
	Ensure { key: String },
	/// Record activity for KEY
	Touch { key: String },
	/// Close the session for KEY
	Close { key: String },
	/// Show the session for KEY
	Get { key: String },
	/// List live sessions
	List,
	/// Run a driver action for KEY, e.g. `session exec t1 -- open https://example.com`
	Exec {
		key: String,
		#[arg(last = true, required = true, value_name = "ARGS")]
		args: Vec<String>,
	},
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
	/// Stream URL, e.g. ws://localhost:9417/
	pub url: String,

	/// Exit after this many frames
	#[arg(long, value_name = "N")]
	pub frames: Option<u64>,

	/// Automatic reconnect attempts before giving up
	#[arg(long, default_value_t = 5, value_name = "N")]
	pub max_attempts: u32,

	/// First reconnect delay in milliseconds; doubles per attempt
	#[arg(long, default_value_t = 1000, value_name = "MS")]
	pub initial_delay_ms: u64,

	/// Upper bound on the reconnect delay in milliseconds
	#[arg(long, default_value_t = 30_000, value_name = "MS")]
	pub max_delay_ms: u64,
}
