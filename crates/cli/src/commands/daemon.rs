use std::net::SocketAddr;

use serde_json::json;

use crate::daemon::{self, SessionRpcClient, connect_client, map_client_error};
use crate::error::{CliError, Result};
use crate::output::{OutputFormat, ResultBuilder, print_result};

pub async fn status(addr: SocketAddr, format: OutputFormat) -> Result<()> {
	let data = if daemon::probe(addr).await {
		let client = connect_client(addr)?;
		let sessions = client.list_sessions().await.map_err(|e| map_client_error(addr, e))?;
		json!({
			"running": true,
			"control": addr.to_string(),
			"sessions": sessions.len(),
			"viewers": sessions.iter().map(|s| s.viewer_count).sum::<usize>(),
		})
	} else {
		json!({ "running": false, "control": addr.to_string() })
	};

	let result = ResultBuilder::new("status").data(data).build();
	print_result(&result, format);
	Ok(())
}

pub async fn stop(addr: SocketAddr, format: OutputFormat) -> Result<()> {
	let client = connect_client(addr)?;
	let data = match client.shutdown().await.map_err(|e| map_client_error(addr, e)) {
		Ok(()) => json!({ "stopped": true }),
		Err(CliError::DaemonNotRunning { .. }) => json!({ "stopped": false, "running": false }),
		Err(err) => return Err(err),
	};

	let result = ResultBuilder::new("stop").data(data).build();
	print_result(&result, format);
	Ok(())
}
