use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tabcast::{SessionRegistry, StreamConfig};

use crate::cli::ServeArgs;
use crate::daemon::{self, Daemon};
use crate::error::{CliError, Result};
use crate::output::{OutputFormat, ResultBuilder, print_result};
use crate::runner::AgentBrowserRunner;

pub async fn run(args: ServeArgs, control: Option<SocketAddr>, format: OutputFormat) -> Result<()> {
	let config = resolve_config(&args, control)?;
	let addr = config.control_addr;
	if daemon::probe(addr).await {
		return Err(CliError::DaemonAlreadyRunning { addr });
	}

	let runner = Arc::new(AgentBrowserRunner::from_config(&config));
	let registry = SessionRegistry::new(config, runner)?;
	let daemon = Daemon::start(registry, addr).await?;

	let config = daemon.registry().config();
	let result = ResultBuilder::new("serve")
		.data(json!({
			"started": true,
			"control": daemon.local_addr().to_string(),
			"basePort": config.base_port,
			"portRange": config.port_range,
			"idleTimeoutSecs": config.idle_timeout_secs,
			"driver": config.driver_program,
		}))
		.build();
	print_result(&result, format);

	daemon.run().await?;
	Ok(())
}

/// Builds the daemon configuration: defaults, then the config file, then the
/// environment, then command-line flags.
pub fn resolve_config(args: &ServeArgs, control: Option<SocketAddr>) -> Result<StreamConfig> {
	resolve_config_with(args, control, |name| std::env::var(name).ok(), default_config_path())
}

fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("tabcast").join("config.json"))
}

fn resolve_config_with(
	args: &ServeArgs,
	control: Option<SocketAddr>,
	lookup: impl Fn(&str) -> Option<String>,
	default_path: Option<PathBuf>,
) -> Result<StreamConfig> {
	let mut config = match (&args.config, default_path) {
		(Some(path), _) => StreamConfig::from_file(path)?,
		(None, Some(path)) => StreamConfig::from_file_or_default(&path)?,
		(None, None) => StreamConfig::default(),
	};
	config.apply_env_from(lookup)?;
	apply_flags(&mut config, args, control);
	config.validate()?;
	Ok(config)
}

fn apply_flags(config: &mut StreamConfig, args: &ServeArgs, control: Option<SocketAddr>) {
	if let Some(port) = args.base_port {
		config.base_port = port;
	}
	if let Some(range) = args.port_range {
		config.port_range = range;
	}
	if let Some(secs) = args.idle_timeout {
		config.idle_timeout_secs = secs;
	}
	if let Some(secs) = args.reaper_interval {
		config.reaper_interval_secs = secs;
	}
	if let Some(secs) = args.startup_timeout {
		config.startup_timeout_ms = secs.saturating_mul(1000);
	}
	if let Some(capacity) = args.viewer_queue {
		config.viewer_queue_capacity = capacity;
	}
	if let Some(host) = &args.bind_host {
		config.bind_host = host.clone();
	}
	if let Some(host) = &args.advertised_host {
		config.advertised_host = host.clone();
	}
	if let Some(port) = args.cdp_port {
		config.cdp_port = Some(port);
	}
	if let Some(driver) = &args.driver {
		config.driver_program = driver.clone();
	}
	if let Some(offset) = args.upstream_port_offset {
		config.upstream_port_offset = offset;
	}
	if let Some(addr) = control {
		config.control_addr = addr;
	}
}
