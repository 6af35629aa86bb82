use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tabcast::{ActivityClock, CaptureTarget, CommandRunner, FramePublisher, RunnerError, SessionKey, StreamConfig, StreamRelay, ViewerMessage};
use tabcast_protocol::{ClientMessage, InputEvent};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use super::{AgentBrowserRunner, BrowserTarget};

fn key(s: &str) -> SessionKey {
	SessionKey::new(s).unwrap()
}

fn args(list: &[&str]) -> Vec<String> {
	list.iter().map(|s| s.to_string()).collect()
}

fn target(port: u16) -> CaptureTarget {
	CaptureTarget {
		port,
		publisher: FramePublisher::detached(),
	}
}

async fn free_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().port()
}

#[test]
fn per_session_commands_name_the_session() {
	let runner = AgentBrowserRunner::new("agent-browser", BrowserTarget::PerSession);
	assert_eq!(
		runner.driver_args(&key("thread-1"), &args(&["open", "https://example.com"])),
		args(&["--session", "thread-1", "open", "https://example.com"])
	);
}

#[test]
fn cdp_commands_name_the_port() {
	let runner = AgentBrowserRunner::new("agent-browser", BrowserTarget::Cdp(9222));
	assert_eq!(runner.driver_args(&key("thread-1"), &args(&["snapshot", "-i"])), args(&["--cdp", "9222", "snapshot", "-i"]));
}

#[test]
fn from_config_picks_cdp_when_configured() {
	let config = StreamConfig {
		cdp_port: Some(9333),
		..StreamConfig::default()
	};
	let runner = AgentBrowserRunner::from_config(&config);
	assert_eq!(runner.driver_args(&key("t"), &[]), args(&["--cdp", "9333"]));
}

#[cfg(unix)]
#[tokio::test]
async fn execute_captures_stdout() {
	let runner = AgentBrowserRunner::new("echo", BrowserTarget::PerSession);
	let output = runner.execute(&key("t1"), &args(&["open", "https://example.com"])).await.unwrap();
	assert!(output.success);
	assert_eq!(output.stdout, "--session t1 open https://example.com\n");
	assert!(output.stderr.is_empty());
	assert_eq!(output.exit_code, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn execute_reports_failure_without_erroring() {
	let runner = AgentBrowserRunner::new("false", BrowserTarget::PerSession);
	let output = runner.execute(&key("t1"), &args(&["click", "@e1"])).await.unwrap();
	assert!(!output.success);
	assert_eq!(output.exit_code, Some(1));
}

#[tokio::test]
async fn missing_driver_is_an_io_error() {
	let runner = AgentBrowserRunner::new("tabcast-no-such-driver", BrowserTarget::PerSession);
	let err = runner.execute(&key("t1"), &args(&["open", "about:blank"])).await.unwrap_err();
	assert!(matches!(err, RunnerError::Io(_)), "got {err:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn failed_open_fails_start() {
	let runner = AgentBrowserRunner::new("false", BrowserTarget::PerSession);
	let err = runner.start(&key("t1"), target(40_000)).await.unwrap_err();
	assert_eq!(err.to_string(), "driver exited with status 1");
}

#[cfg(unix)]
#[tokio::test]
async fn start_without_upstream_still_succeeds() {
	let port = free_port().await;
	let runner = AgentBrowserRunner::new("true", BrowserTarget::PerSession)
		.with_upstream_port_offset(0)
		.with_ready_timeout(Duration::from_millis(250));

	let endpoint = runner.start(&key("t1"), target(port)).await.unwrap();
	assert!(!endpoint.capturing);
	assert_eq!(endpoint.upstream, None);

	let event: InputEvent = serde_json::from_value(json!({ "type": "pointer", "kind": "click", "x": 1.0, "y": 2.0 })).unwrap();
	assert!(matches!(runner.send_input(&key("t1"), event).await, Err(RunnerError::NotRunning)));

	runner.stop(&key("t1")).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn stop_of_unknown_session_is_ok() {
	let runner = AgentBrowserRunner::new("false", BrowserTarget::PerSession);
	runner.stop(&key("never-started")).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn upstream_frames_reach_viewers_and_input_flows_back() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let (input_tx, input_rx) = oneshot::channel::<String>();

	let upstream = tokio::spawn(async move {
		loop {
			let (stream, _) = listener.accept().await.unwrap();
			// The readiness probe connects and hangs up without a handshake.
			let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
				continue;
			};
			let status = json!({ "type": "status", "connected": true, "screencasting": true, "viewportWidth": 1024, "viewportHeight": 768 });
			ws.send(Message::Text(status.to_string())).await.unwrap();
			let frame = json!({ "type": "frame", "data": "/9j/", "metadata": { "deviceWidth": 1024, "deviceHeight": 768 } });
			ws.send(Message::Text(frame.to_string())).await.unwrap();

			while let Some(Ok(msg)) = ws.next().await {
				if let Message::Text(text) = msg {
					let _ = input_tx.send(text);
					break;
				}
			}
			return;
		}
	});

	let k = key("live");
	let activity = Arc::new(ActivityClock::new(tokio::time::Instant::now()));
	let (relay, _inputs) = StreamRelay::new(k.clone(), port, 4, activity);
	let mut viewer = relay.attach_viewer().unwrap();

	let runner = AgentBrowserRunner::new("true", BrowserTarget::PerSession)
		.with_upstream_port_offset(0)
		.with_ready_timeout(Duration::from_secs(2));
	let endpoint = runner
		.start(
			&k,
			CaptureTarget {
				port,
				publisher: relay.publisher(),
			},
		)
		.await
		.unwrap();
	assert_eq!(endpoint.upstream, Some(format!("ws://127.0.0.1:{port}/")));

	let frame = tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			match viewer.recv().await {
				Some(ViewerMessage::Frame(frame)) => return frame,
				Some(ViewerMessage::Status(_)) => continue,
				None => panic!("viewer closed before a frame arrived"),
			}
		}
	})
	.await
	.unwrap();
	assert_eq!(frame.data, "/9j/");
	assert!(relay.status().capturing);
	assert_eq!(relay.status().viewport_width, 1024);

	let event: InputEvent = serde_json::from_value(json!({ "type": "pointer", "kind": "click", "x": 10.0, "y": 20.0 })).unwrap();
	runner.send_input(&k, event.clone()).await.unwrap();
	let forwarded = tokio::time::timeout(Duration::from_secs(5), input_rx).await.unwrap().unwrap();
	let forwarded: ClientMessage = serde_json::from_str(&forwarded).unwrap();
	assert_eq!(forwarded, ClientMessage::Input { event });

	runner.stop(&k).await.unwrap();
	upstream.await.unwrap();
}
