//! Drives a daemon with a mock runner through its JSON-RPC client.

use std::sync::Arc;
use std::time::Duration;

use tabcast::testing::MockRunner;
use tabcast::{SessionRegistry, StreamConfig};
use tabcast_cli::daemon::{Daemon, SessionRpcClient, connect_client, map_client_error, probe};
use tabcast_cli::error::CliError;
use tabcast_cli::output::ErrorCode;

fn config(base_port: u16) -> StreamConfig {
	StreamConfig {
		base_port,
		port_range: 16,
		serve_viewers: false,
		..StreamConfig::default()
	}
}

async fn start(base_port: u16) -> (Daemon, Arc<MockRunner>) {
	let runner = Arc::new(MockRunner::new());
	let registry = SessionRegistry::new(config(base_port), runner.clone()).unwrap();
	let daemon = Daemon::start(registry, "127.0.0.1:0".parse().unwrap()).await.unwrap();
	(daemon, runner)
}

#[tokio::test]
async fn session_lifecycle_over_rpc() {
	let (daemon, runner) = start(48_100).await;
	let addr = daemon.local_addr();
	assert!(probe(addr).await);
	let client = connect_client(addr).unwrap();

	let first = client.ensure_session("thread-1".to_string()).await.unwrap();
	assert!(first.active);
	assert!((48_100..48_116).contains(&first.port));
	assert_eq!(first.stream_url, format!("ws://localhost:{}/", first.port));

	let again = client.ensure_session("thread-1".to_string()).await.unwrap();
	assert_eq!(again.port, first.port);
	assert_eq!(runner.start_count(), 1);

	assert!(client.touch_session("thread-1".to_string()).await.unwrap());
	assert!(!client.touch_session("nobody".to_string()).await.unwrap());

	let listed = client.list_sessions().await.unwrap();
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].key, "thread-1");

	let output = client
		.exec("thread-1".to_string(), vec!["open".to_string(), "https://example.com".to_string()])
		.await
		.unwrap();
	assert!(output.success);
	assert_eq!(output.stdout, "open https://example.com");

	assert!(client.close_session("thread-1".to_string()).await.unwrap());
	assert!(!client.close_session("thread-1".to_string()).await.unwrap());
	assert_eq!(client.get_session("thread-1".to_string()).await.unwrap(), None);
	assert_eq!(runner.stop_count(), 1);

	daemon.shutdown().await;
}

#[tokio::test]
async fn daemon_errors_keep_their_codes() {
	let (daemon, runner) = start(48_200).await;
	let addr = daemon.local_addr();
	let client = connect_client(addr).unwrap();

	runner.fail_next_start("chromium crashed");
	let err = client.ensure_session("t1".to_string()).await.unwrap_err();
	match map_client_error(addr, err) {
		CliError::Rpc { code, message } => {
			assert_eq!(code, Some(ErrorCode::RunnerFailed));
			assert!(message.contains("chromium crashed"), "{message}");
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(daemon.registry().held_ports().is_empty());

	let err = client.ensure_session(" ".to_string()).await.unwrap_err();
	assert!(matches!(
		map_client_error(addr, err),
		CliError::Rpc {
			code: Some(ErrorCode::InvalidKey),
			..
		}
	));

	daemon.shutdown().await;
}

#[tokio::test]
async fn shutdown_rpc_stops_the_daemon_and_closes_sessions() {
	let (daemon, runner) = start(48_300).await;
	let addr = daemon.local_addr();
	let client = connect_client(addr).unwrap();
	client.ensure_session("a".to_string()).await.unwrap();
	client.ensure_session("b".to_string()).await.unwrap();

	let running = tokio::spawn(daemon.run());
	client.shutdown().await.unwrap();
	tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap().unwrap();

	assert_eq!(runner.stop_count(), 2);
	assert!(!probe(addr).await);
}
