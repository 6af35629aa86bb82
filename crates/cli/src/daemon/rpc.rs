use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::types::error::INVALID_PARAMS_CODE;
use tabcast::{SessionKey, SessionRegistry};
use tabcast_protocol::{CommandOutput, SessionInfo};
use tokio::sync::watch;
use tracing::info;

/// JSON-RPC error code for session-manager failures. The stable error name travels
/// in the error's `data.code`.
pub const SESSION_ERROR_CODE: i32 = -32001;

#[rpc(client, server)]
pub trait SessionRpc {
	#[method(name = "session_ping")]
	async fn ping(&self) -> RpcResult<bool>;

	/// Returns the live session for `key`, starting one if needed.
	#[method(name = "session_ensure")]
	async fn ensure_session(&self, key: String) -> RpcResult<SessionInfo>;

	/// Records activity. Returns `false` when no session is open for `key`.
	#[method(name = "session_touch")]
	async fn touch_session(&self, key: String) -> RpcResult<bool>;

	/// Closes the session. Returns `false` when there was nothing to close.
	#[method(name = "session_close")]
	async fn close_session(&self, key: String) -> RpcResult<bool>;

	#[method(name = "session_get")]
	async fn get_session(&self, key: String) -> RpcResult<Option<SessionInfo>>;

	#[method(name = "session_list")]
	async fn list_sessions(&self) -> RpcResult<Vec<SessionInfo>>;

	/// Runs a driver action, starting the session first if needed.
	#[method(name = "session_exec")]
	async fn exec(&self, key: String, args: Vec<String>) -> RpcResult<CommandOutput>;

	#[method(name = "session_shutdown")]
	async fn shutdown(&self) -> RpcResult<()>;
}

/// Serves [`SessionRpcServer`] on top of a [`SessionRegistry`].
pub struct SessionService {
	registry: SessionRegistry,
	shutdown_tx: watch::Sender<bool>,
}

impl SessionService {
	pub fn new(registry: SessionRegistry, shutdown_tx: watch::Sender<bool>) -> Self {
		Self { registry, shutdown_tx }
	}
}

#[jsonrpsee::core::async_trait]
impl SessionRpcServer for SessionService {
	async fn ping(&self) -> RpcResult<bool> {
		Ok(true)
	}

	async fn ensure_session(&self, key: String) -> RpcResult<SessionInfo> {
		let key = parse_key(key)?;
		let session = self.registry.ensure_active(&key).await.map_err(to_rpc_error)?;
		Ok(session.to_info())
	}

	async fn touch_session(&self, key: String) -> RpcResult<bool> {
		let key = parse_key(key)?;
		if self.registry.get(&key).is_none() {
			return Ok(false);
		}
		self.registry.touch(&key);
		Ok(true)
	}

	async fn close_session(&self, key: String) -> RpcResult<bool> {
		let key = parse_key(key)?;
		let existed = self.registry.get(&key).is_some();
		self.registry.close(&key).await.map_err(to_rpc_error)?;
		Ok(existed)
	}

	async fn get_session(&self, key: String) -> RpcResult<Option<SessionInfo>> {
		let key = parse_key(key)?;
		Ok(self.registry.get(&key).map(|s| s.to_info()))
	}

	async fn list_sessions(&self) -> RpcResult<Vec<SessionInfo>> {
		Ok(self.registry.list_active().iter().map(|s| s.to_info()).collect())
	}

	async fn exec(&self, key: String, args: Vec<String>) -> RpcResult<CommandOutput> {
		let key = parse_key(key)?;
		if args.is_empty() {
			return Err(ErrorObjectOwned::owned(
				INVALID_PARAMS_CODE,
				"exec needs at least one driver argument",
				Some(serde_json::json!({ "code": "INVALID_ARGUMENT" })),
			));
		}
		self.registry.execute(&key, &args).await.map_err(to_rpc_error)
	}

	async fn shutdown(&self) -> RpcResult<()> {
		info!(target = "tabcast.daemon", "shutdown requested over rpc");
		let _ = self.shutdown_tx.send(true);
		Ok(())
	}
}

fn parse_key(key: String) -> RpcResult<SessionKey> {
	SessionKey::new(key).map_err(|err| {
		ErrorObjectOwned::owned(INVALID_PARAMS_CODE, err.to_string(), Some(serde_json::json!({ "code": err.code() })))
	})
}

fn to_rpc_error(err: tabcast::Error) -> ErrorObjectOwned {
	ErrorObjectOwned::owned(
		SESSION_ERROR_CODE,
		err.to_string(),
		Some(serde_json::json!({ "code": err.code(), "retryable": err.is_retryable() })),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn core_errors_carry_their_code_in_data() {
		let err = to_rpc_error(tabcast::Error::ExhaustedPortRange { base: 9223, range: 4 });
		assert_eq!(err.code(), SESSION_ERROR_CODE);
		let data: serde_json::Value = serde_json::from_str(err.data().unwrap().get()).unwrap();
		assert_eq!(data["code"], "PORT_RANGE_EXHAUSTED");
		assert_eq!(data["retryable"], true);
	}

	#[test]
	fn blank_key_is_invalid_params() {
		let err = parse_key("   ".to_string()).unwrap_err();
		assert_eq!(err.code(), INVALID_PARAMS_CODE);
		let data: serde_json::Value = serde_json::from_str(err.data().unwrap().get()).unwrap();
		assert_eq!(data["code"], "INVALID_KEY");
	}
}
