use std::net::SocketAddr;
use std::time::Instant;

use jsonrpsee::core::ClientError;
use serde_json::{Value, json};

use crate::cli::SessionAction;
use crate::daemon::{SessionRpcClient, connect_client, map_client_error};
use crate::error::{CliError, Result};
use crate::output::{ErrorCode, OutputFormat, ResultBuilder, print_result};

pub async fn run(name: &str, action: SessionAction, addr: SocketAddr, format: OutputFormat) -> Result<()> {
	let client = connect_client(addr)?;
	let started = Instant::now();
	let rpc_err = |err: ClientError| map_client_error(addr, err);

	let data: Value = match action {
		SessionAction::Ensure { key } => serde_json::to_value(client.ensure_session(key).await.map_err(rpc_err)?)?,
		SessionAction::Touch { key } => {
			let touched = client.touch_session(key.clone()).await.map_err(rpc_err)?;
			json!({ "key": key, "touched": touched })
		}
		SessionAction::Close { key } => {
			let closed = client.close_session(key.clone()).await.map_err(rpc_err)?;
			json!({ "key": key, "closed": closed })
		}
		SessionAction::Get { key } => match client.get_session(key.clone()).await.map_err(rpc_err)? {
			Some(info) => serde_json::to_value(info)?,
			None => {
				return Err(CliError::Rpc {
					code: Some(ErrorCode::UnknownSession),
					message: format!("no active session for key '{key}'"),
				});
			}
		},
		SessionAction::List => serde_json::to_value(client.list_sessions().await.map_err(rpc_err)?)?,
		SessionAction::Exec { key, args } => {
			let output = client.exec(key, args).await.map_err(rpc_err)?;
			if !output.success {
				let message = if output.stderr.trim().is_empty() {
					"driver command failed".to_string()
				} else {
					output.stderr.trim().to_string()
				};
				let result = ResultBuilder::new(name)
					.data(serde_json::to_value(&output)?)
					.error(ErrorCode::RunnerFailed, message.clone())
					.duration(started.elapsed())
					.build();
				print_result(&result, format);
				return Err(CliError::OutputPrinted(message));
			}
			serde_json::to_value(output)?
		}
	};

	let result = ResultBuilder::new(name).data(data).duration(started.elapsed()).build();
	print_result(&result, format);
	Ok(())
}
