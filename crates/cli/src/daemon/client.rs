use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};

use super::rpc::SessionRpcClient;
use crate::error::{CliError, Result};
use crate::output::ErrorCode;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session starts and driver actions can take a while; leave room above the daemon's
/// own startup and command timeouts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn endpoint_url(addr: SocketAddr) -> String {
	format!("http://{addr}")
}

/// RPC client for the daemon at `addr`.
pub fn connect_client(addr: SocketAddr) -> Result<HttpClient> {
	build_client(addr, REQUEST_TIMEOUT)
}

pub(crate) fn connect_probe_client(addr: SocketAddr) -> Result<HttpClient> {
	build_client(addr, PROBE_TIMEOUT)
}

fn build_client(addr: SocketAddr, timeout: Duration) -> Result<HttpClient> {
	HttpClientBuilder::default()
		.request_timeout(timeout)
		.build(endpoint_url(addr))
		.map_err(|err| CliError::Rpc {
			code: None,
			message: format!("failed to create daemon client: {err}"),
		})
}

/// Returns `true` when a daemon answers pings at `addr`.
pub async fn probe(addr: SocketAddr) -> bool {
	let Ok(client) = connect_probe_client(addr) else {
		return false;
	};
	client.ping().await.unwrap_or(false)
}

/// Converts a client failure into a [`CliError`], recognizing an absent daemon and
/// the daemon's own error codes.
pub fn map_client_error(addr: SocketAddr, err: ClientError) -> CliError {
	if is_not_running_error(&err) {
		return CliError::DaemonNotRunning { addr };
	}
	match err {
		ClientError::Call(obj) => {
			let code = obj
				.data()
				.and_then(|raw| serde_json::from_str::<serde_json::Value>(raw.get()).ok())
				.and_then(|data| data.get("code").and_then(|c| c.as_str()).and_then(ErrorCode::from_code));
			CliError::Rpc {
				code,
				message: obj.message().to_string(),
			}
		}
		other => CliError::Rpc {
			code: None,
			message: other.to_string(),
		},
	}
}

pub(crate) fn is_not_running_error(err: &ClientError) -> bool {
	if matches!(err, ClientError::RestartNeeded(_) | ClientError::RequestTimeout) {
		return true;
	}

	// The HTTP transport nests the io::Error a few sources deep.
	let chain_refused = match err {
		ClientError::Transport(transport_err) => has_connection_io_error(transport_err.as_ref()),
		other => has_connection_io_error(other),
	};
	if chain_refused {
		return true;
	}

	let msg = err.to_string().to_ascii_lowercase();
	msg.contains("connection refused")
		|| msg.contains("connection reset")
		|| msg.contains("client error (connect)")
		|| msg.contains("error trying to connect")
		|| msg.contains("tcp connect error")
		|| msg.contains("connection closed before message completed")
}

fn has_connection_io_error(err: &(dyn std::error::Error + 'static)) -> bool {
	std::iter::successors(Some(err), |e| e.source()).any(|e| {
		e.downcast_ref::<std::io::Error>().is_some_and(|io_err| {
			matches!(
				io_err.kind(),
				ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected | ErrorKind::TimedOut
			)
		})
	})
}
