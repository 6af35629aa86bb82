//! Runtime configuration for the session manager.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables. The binary applies command-line flags last.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable the browser driver itself uses for its stream port.
pub const DRIVER_STREAM_PORT_ENV: &str = "AGENT_BROWSER_STREAM_PORT";

const ENV_PREFIX: &str = "TABCAST_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
	/// First port of the per-session stream range.
	pub base_port: u16,
	/// Number of ports in the range.
	pub port_range: u16,
	pub idle_timeout_secs: u64,
	pub reaper_interval_secs: u64,
	pub startup_timeout_ms: u64,
	pub stop_timeout_ms: u64,
	pub command_timeout_ms: u64,
	/// Frames buffered per viewer before the oldest is dropped.
	pub viewer_queue_capacity: usize,
	/// Interface stream endpoints bind to.
	pub bind_host: String,
	/// Host written into stream URLs handed to viewers.
	pub advertised_host: String,
	/// Whether each session's relay listens for viewers on its port. Embedders that
	/// serve viewers themselves can turn this off.
	pub serve_viewers: bool,
	/// Distance between a session's stream port and the driver's own stream server.
	pub upstream_port_offset: u16,
	/// Address of the daemon's JSON-RPC control endpoint.
	pub control_addr: SocketAddr,
	/// Attach the driver to an existing browser over CDP instead of launching one.
	pub cdp_port: Option<u16>,
	/// Browser driver executable.
	pub driver_program: String,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			base_port: 9223,
			port_range: 1000,
			idle_timeout_secs: 300,
			reaper_interval_secs: 10,
			startup_timeout_ms: 15_000,
			stop_timeout_ms: 10_000,
			command_timeout_ms: 30_000,
			viewer_queue_capacity: 8,
			bind_host: "127.0.0.1".to_string(),
			advertised_host: "localhost".to_string(),
			serve_viewers: true,
			upstream_port_offset: 1000,
			control_addr: SocketAddr::from(([127, 0, 0, 1], 19223)),
			cdp_port: None,
			driver_program: "agent-browser".to_string(),
		}
	}
}

impl StreamConfig {
	pub fn idle_timeout(&self) -> Duration {
		Duration::from_secs(self.idle_timeout_secs)
	}

	pub fn reaper_interval(&self) -> Duration {
		Duration::from_secs(self.reaper_interval_secs)
	}

	pub fn startup_timeout(&self) -> Duration {
		Duration::from_millis(self.startup_timeout_ms)
	}

	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}

	pub fn command_timeout(&self) -> Duration {
		Duration::from_millis(self.command_timeout_ms)
	}

	pub fn stream_url(&self, port: u16) -> String {
		format!("ws://{}:{port}/", self.advertised_host)
	}

	/// Reads a JSON config file. Missing keys keep their defaults.
	pub fn from_file(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
		serde_json::from_str(&content).map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
	}

	/// Reads `path` if it exists, otherwise returns the defaults.
	pub fn from_file_or_default(path: &Path) -> Result<Self> {
		if path.exists() { Self::from_file(path) } else { Ok(Self::default()) }
	}

	/// Overlays values from the process environment.
	pub fn apply_env(&mut self) -> Result<()> {
		self.apply_env_from(|name| std::env::var(name).ok())
	}

	/// Overlays values from `lookup`, which maps a variable name to its value.
	///
	/// `AGENT_BROWSER_STREAM_PORT` sets the base port; `TABCAST_BASE_PORT` wins over it.
	pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
		let var = |suffix: &str| {
			let name = format!("{ENV_PREFIX}{suffix}");
			lookup(&name).filter(|v| !v.trim().is_empty()).map(|v| (name, v))
		};

		if let Some(value) = lookup(DRIVER_STREAM_PORT_ENV).filter(|v| !v.trim().is_empty()) {
			self.base_port = parse_env(DRIVER_STREAM_PORT_ENV, &value)?;
		}
		if let Some((name, value)) = var("BASE_PORT") {
			self.base_port = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("PORT_RANGE") {
			self.port_range = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("IDLE_TIMEOUT_SECS") {
			self.idle_timeout_secs = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("REAPER_INTERVAL_SECS") {
			self.reaper_interval_secs = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("STARTUP_TIMEOUT_MS") {
			self.startup_timeout_ms = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("STOP_TIMEOUT_MS") {
			self.stop_timeout_ms = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("COMMAND_TIMEOUT_MS") {
			self.command_timeout_ms = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("VIEWER_QUEUE_CAPACITY") {
			self.viewer_queue_capacity = parse_env(&name, &value)?;
		}
		if let Some((_, value)) = var("BIND_HOST") {
			self.bind_host = value;
		}
		if let Some((_, value)) = var("ADVERTISED_HOST") {
			self.advertised_host = value;
		}
		if let Some((name, value)) = var("UPSTREAM_PORT_OFFSET") {
			self.upstream_port_offset = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("CONTROL_ADDR") {
			self.control_addr = parse_env(&name, &value)?;
		}
		if let Some((name, value)) = var("CDP_PORT") {
			self.cdp_port = Some(parse_env(&name, &value)?);
		}
		if let Some((_, value)) = var("DRIVER") {
			self.driver_program = value;
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		if self.port_range == 0 {
			return Err(Error::Config("port_range must be at least 1".to_string()));
		}
		if u32::from(self.base_port) + u32::from(self.port_range) - 1 > u32::from(u16::MAX) {
			return Err(Error::Config(format!(
				"port range {}..{} runs past 65535",
				self.base_port,
				u32::from(self.base_port) + u32::from(self.port_range)
			)));
		}
		if self.upstream_port_offset < self.port_range {
			return Err(Error::Config(format!(
				"upstream_port_offset ({}) must be at least port_range ({}) so driver stream ports stay outside the session range",
				self.upstream_port_offset, self.port_range
			)));
		}
		let last_upstream = u32::from(self.base_port) + u32::from(self.port_range) - 1 + u32::from(self.upstream_port_offset);
		if last_upstream > u32::from(u16::MAX) {
			return Err(Error::Config(format!(
				"driver stream port {last_upstream} (base_port + port_range - 1 + upstream_port_offset) runs past 65535"
			)));
		}
		if self.viewer_queue_capacity == 0 {
			return Err(Error::Config("viewer_queue_capacity must be at least 1".to_string()));
		}
		if self.idle_timeout_secs == 0 || self.reaper_interval_secs == 0 {
			return Err(Error::Config("idle_timeout_secs and reaper_interval_secs must be non-zero".to_string()));
		}
		if self.startup_timeout_ms == 0 || self.stop_timeout_ms == 0 || self.command_timeout_ms == 0 {
			return Err(Error::Config("timeouts must be non-zero".to_string()));
		}
		if self.reaper_interval_secs >= self.idle_timeout_secs {
			return Err(Error::Config(format!(
				"reaper_interval_secs ({}) must be shorter than idle_timeout_secs ({})",
				self.reaper_interval_secs, self.idle_timeout_secs
			)));
		}
		if self.bind_host.trim().is_empty() || self.advertised_host.trim().is_empty() {
			return Err(Error::Config("bind_host and advertised_host must not be empty".to_string()));
		}
		Ok(())
	}
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
	T::Err: std::fmt::Display,
{
	value.trim().parse().map_err(|e| Error::Config(format!("{name}={value}: {e}")))
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::io::Write;

	use super::*;

	fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		move |name| map.get(name).cloned()
	}

	#[test]
	fn defaults_are_valid() {
		let config = StreamConfig::default();
		config.validate().unwrap();
		assert_eq!(config.base_port, 9223);
		assert_eq!(config.idle_timeout(), Duration::from_secs(300));
		assert_eq!(config.stream_url(9300), "ws://localhost:9300/");
	}

	#[test]
	fn file_overrides_only_present_keys() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{ "base_port": 12000, "viewer_queue_capacity": 2 }}"#).unwrap();
		let config = StreamConfig::from_file(file.path()).unwrap();
		assert_eq!(config.base_port, 12000);
		assert_eq!(config.viewer_queue_capacity, 2);
		assert_eq!(config.port_range, 1000);
	}

	#[test]
	fn missing_file_falls_back_to_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let config = StreamConfig::from_file_or_default(&dir.path().join("config.json")).unwrap();
		assert_eq!(config, StreamConfig::default());
	}

	#[test]
	fn malformed_file_is_a_config_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "not json").unwrap();
		let err = StreamConfig::from_file(file.path()).unwrap_err();
		assert_eq!(err.code(), "INVALID_CONFIG");
	}

	#[test]
	fn env_layers_over_file_values() {
		let mut config = StreamConfig {
			base_port: 12000,
			..StreamConfig::default()
		};
		config
			.apply_env_from(env(&[("AGENT_BROWSER_STREAM_PORT", "13000"), ("TABCAST_IDLE_TIMEOUT_SECS", "60"), ("TABCAST_CDP_PORT", "9222")]))
			.unwrap();
		assert_eq!(config.base_port, 13000);
		assert_eq!(config.idle_timeout_secs, 60);
		assert_eq!(config.cdp_port, Some(9222));

		config.apply_env_from(env(&[("AGENT_BROWSER_STREAM_PORT", "13000"), ("TABCAST_BASE_PORT", "14000")])).unwrap();
		assert_eq!(config.base_port, 14000);
	}

	#[test]
	fn bad_env_value_names_the_variable() {
		let mut config = StreamConfig::default();
		let err = config.apply_env_from(env(&[("TABCAST_PORT_RANGE", "lots")])).unwrap_err();
		assert!(err.to_string().contains("TABCAST_PORT_RANGE"));
	}

	#[test]
	fn validate_rejects_inconsistent_values() {
		let cases = [
			StreamConfig {
				port_range: 0,
				..StreamConfig::default()
			},
			StreamConfig {
				base_port: 65000,
				port_range: 1000,
				..StreamConfig::default()
			},
			StreamConfig {
				viewer_queue_capacity: 0,
				..StreamConfig::default()
			},
			StreamConfig {
				reaper_interval_secs: 300,
				..StreamConfig::default()
			},
			StreamConfig {
				port_range: 2000,
				..StreamConfig::default()
			},
			StreamConfig {
				base_port: 64_600,
				port_range: 100,
				..StreamConfig::default()
			},
		];
		for config in cases {
			assert!(config.validate().is_err(), "{config:?} should be rejected");
		}
	}

	#[test]
	fn driver_stream_ports_stay_outside_session_range() {
		let overlapping = StreamConfig {
			port_range: 2000,
			..StreamConfig::default()
		};
		let err = overlapping.validate().unwrap_err();
		assert!(err.to_string().contains("upstream_port_offset"), "{err}");

		let edge = StreamConfig {
			port_range: 1000,
			upstream_port_offset: 1000,
			..StreamConfig::default()
		};
		edge.validate().unwrap();

		let past_max = StreamConfig {
			base_port: 64_000,
			port_range: 100,
			upstream_port_offset: 1536,
			..StreamConfig::default()
		};
		assert!(past_max.validate().unwrap_err().to_string().contains("65535"));
		StreamConfig {
			upstream_port_offset: 1435,
			..past_max
		}
		.validate()
		.unwrap();
	}
}
