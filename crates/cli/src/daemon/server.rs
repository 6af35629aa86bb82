use std::net::SocketAddr;

use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use tabcast::{ReaperHandle, SessionRegistry};
use tokio::sync::watch;
use tracing::{info, warn};

use super::rpc::{SessionRpcServer, SessionService};

/// The long-running process that owns the session registry and serves control RPCs.
pub struct Daemon {
	registry: SessionRegistry,
	addr: SocketAddr,
	handle: ServerHandle,
	reaper: Option<ReaperHandle>,
	shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
	/// Binds the control endpoint at `addr` and starts the idle reaper.
	pub async fn start(registry: SessionRegistry, addr: SocketAddr) -> Result<Self> {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		let server = Server::builder()
			.build(addr)
			.await
			.with_context(|| format!("Failed to bind daemon control endpoint: {addr}"))?;
		let addr = server.local_addr().context("Failed to read control endpoint address")?;

		let service = SessionService::new(registry.clone(), shutdown_tx);
		let handle = server.start(service.into_rpc());
		let reaper = registry.spawn_reaper();

		let config = registry.config();
		info!(
			target = "tabcast.daemon",
			%addr,
			base_port = config.base_port,
			port_range = config.port_range,
			idle_timeout_secs = config.idle_timeout_secs,
			"daemon listening"
		);

		Ok(Self {
			registry,
			addr,
			handle,
			reaper,
			shutdown_rx,
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	/// Serves until a shutdown RPC, SIGINT, or SIGTERM, then closes every session.
	pub async fn run(mut self) -> Result<()> {
		wait_for_shutdown(&mut self.shutdown_rx).await?;
		self.shutdown().await;
		Ok(())
	}

	/// Closes every session, stops the reaper, and stops serving RPCs.
	pub async fn shutdown(self) {
		let sessions = self.registry.len();
		self.registry.shutdown().await;
		if let Some(reaper) = self.reaper {
			reaper.stop().await;
		}
		if self.handle.stop().is_ok() {
			self.handle.stopped().await;
		}
		info!(target = "tabcast.daemon", sessions, "daemon stopped");
	}
}

#[cfg(unix)]
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	tokio::select! {
		res = shutdown_rx.wait_for(|stop| *stop) => {
			if res.is_err() {
				warn!(target = "tabcast.daemon", "shutdown channel closed");
			}
		}
		_ = sigterm.recv() => info!(target = "tabcast.daemon", "received SIGTERM"),
		_ = sigint.recv() => info!(target = "tabcast.daemon", "received SIGINT"),
	}
	Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) -> Result<()> {
	tokio::select! {
		res = shutdown_rx.wait_for(|stop| *stop) => {
			if res.is_err() {
				warn!(target = "tabcast.daemon", "shutdown channel closed");
			}
		}
		_ = tokio::signal::ctrl_c() => info!(target = "tabcast.daemon", "received ctrl-c"),
	}
	Ok(())
}
