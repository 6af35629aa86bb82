use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tabcast::config::DRIVER_STREAM_PORT_ENV;
use tabcast::{CaptureTarget, CommandRunner, FramePublisher, RunnerError, SessionKey, StreamConfig, StreamEndpoint};
use tabcast_protocol::{ClientMessage, CommandOutput, InputEvent, ServerMessage, Viewport};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(100);
const UPSTREAM_HOST: &str = "127.0.0.1";

/// How the driver picks the browser a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserTarget {
	/// One isolated browser per session key.
	PerSession,
	/// A single existing browser reached over CDP on this port.
	Cdp(u16),
}

/// Link to the driver's own stream server for one session.
struct Upstream {
	input_tx: mpsc::UnboundedSender<InputEvent>,
	pump: JoinHandle<()>,
}

/// Drives sessions through the `agent-browser` command-line tool.
///
/// Each session's browser is started with the driver's stream server on
/// `port + upstream_port_offset`; frames read from it are republished to the
/// session's relay, and viewer input is forwarded back.
pub struct AgentBrowserRunner {
	program: String,
	target: BrowserTarget,
	upstream_port_offset: u16,
	command_timeout: Duration,
	ready_timeout: Duration,
	sessions: Mutex<HashMap<SessionKey, Option<Upstream>>>,
}

impl AgentBrowserRunner {
	pub fn new(program: impl Into<String>, target: BrowserTarget) -> Self {
		Self {
			program: program.into(),
			target,
			upstream_port_offset: 1000,
			command_timeout: Duration::from_secs(30),
			ready_timeout: READY_TIMEOUT,
			sessions: Mutex::new(HashMap::new()),
		}
	}

	pub fn from_config(config: &StreamConfig) -> Self {
		let target = config.cdp_port.map_or(BrowserTarget::PerSession, BrowserTarget::Cdp);
		Self::new(config.driver_program.clone(), target)
			.with_upstream_port_offset(config.upstream_port_offset)
			.with_command_timeout(config.command_timeout())
	}

	pub fn with_upstream_port_offset(mut self, offset: u16) -> Self {
		self.upstream_port_offset = offset;
		self
	}

	pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
		self.command_timeout = timeout;
		self
	}

	/// How long `start` waits for the driver's stream server to accept connections.
	pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	/// Full driver argument list for `args` run against `key`'s browser.
	pub fn driver_args(&self, key: &SessionKey, args: &[String]) -> Vec<String> {
		let mut full = match self.target {
			BrowserTarget::Cdp(port) => vec!["--cdp".to_string(), port.to_string()],
			BrowserTarget::PerSession => vec!["--session".to_string(), key.to_string()],
		};
		full.extend(args.iter().cloned());
		full
	}

	async fn run(&self, key: &SessionKey, args: &[String], stream_port: Option<u16>) -> Result<CommandOutput, RunnerError> {
		let mut cmd = Command::new(&self.program);
		cmd.args(self.driver_args(key, args))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(port) = stream_port {
			cmd.env(DRIVER_STREAM_PORT_ENV, port.to_string());
		}

		debug!(target = "tabcast.driver", session = key.short(), ?args, "running driver");
		let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
			Ok(output) => output?,
			Err(_) => {
				return Err(RunnerError::failed(format!(
					"command timed out after {} seconds",
					self.command_timeout.as_secs()
				)));
			}
		};

		let success = output.status.success();
		Ok(CommandOutput {
			success,
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: if success {
				String::new()
			} else {
				String::from_utf8_lossy(&output.stderr).into_owned()
			},
			exit_code: output.status.code(),
		})
	}

	fn upstream_port(&self, port: u16) -> Result<u16, RunnerError> {
		port.checked_add(self.upstream_port_offset)
			.ok_or_else(|| RunnerError::failed(format!("upstream port for {port} (+{}) overflows", self.upstream_port_offset)))
	}
}

#[async_trait]
impl CommandRunner for AgentBrowserRunner {
	async fn start(&self, key: &SessionKey, target: CaptureTarget) -> Result<StreamEndpoint, RunnerError> {
		let upstream_port = self.upstream_port(target.port)?;
		let open = self.run(key, &["open".to_string(), "about:blank".to_string()], Some(upstream_port)).await?;
		if !open.success {
			return Err(RunnerError::Failed(failure_message(&open)));
		}

		let url = format!("ws://{UPSTREAM_HOST}:{upstream_port}/");
		let upstream = if wait_for_stream_ready(upstream_port, self.ready_timeout).await {
			match connect_async(url.as_str()).await {
				Ok((socket, _)) => Some(spawn_pump(key.clone(), socket, target.publisher)),
				Err(err) => {
					warn!(target = "tabcast.driver", session = key.short(), %url, error = %err, "upstream stream refused connection");
					None
				}
			}
		} else {
			warn!(
				target = "tabcast.driver",
				session = key.short(),
				port = upstream_port,
				"driver stream not ready, continuing without frames"
			);
			None
		};

		let connected = upstream.is_some();
		self.sessions.lock().await.insert(key.clone(), upstream);
		info!(target = "tabcast.driver", session = key.short(), upstream = connected, "browser opened");

		Ok(StreamEndpoint {
			viewport: Viewport::default(),
			capturing: false,
			upstream: connected.then_some(url),
		})
	}

	async fn stop(&self, key: &SessionKey) -> Result<(), RunnerError> {
		let known = match self.sessions.lock().await.remove(key) {
			Some(upstream) => {
				if let Some(upstream) = upstream {
					upstream.pump.abort();
				}
				true
			}
			None => false,
		};

		match self.run(key, &["close".to_string()], None).await {
			Ok(output) if output.success => Ok(()),
			Ok(output) if known => Err(RunnerError::Failed(failure_message(&output))),
			Err(err) if known => Err(err),
			_ => {
				debug!(target = "tabcast.driver", session = key.short(), "nothing to close");
				Ok(())
			}
		}
	}

	async fn send_input(&self, key: &SessionKey, event: InputEvent) -> Result<(), RunnerError> {
		let sessions = self.sessions.lock().await;
		let Some(Some(upstream)) = sessions.get(key) else {
			return Err(RunnerError::NotRunning);
		};
		upstream.input_tx.send(event).map_err(|_| RunnerError::NotRunning)
	}

	async fn execute(&self, key: &SessionKey, args: &[String]) -> Result<CommandOutput, RunnerError> {
		self.run(key, args, None).await
	}
}

fn failure_message(output: &CommandOutput) -> String {
	let stderr = output.stderr.trim();
	if !stderr.is_empty() {
		return stderr.to_string();
	}
	match output.exit_code {
		Some(code) => format!("driver exited with status {code}"),
		None => "driver was terminated by a signal".to_string(),
	}
}

/// Polls until something accepts TCP connections on `port`.
async fn wait_for_stream_ready(port: u16, timeout: Duration) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	let mut attempts = 0u32;
	loop {
		attempts += 1;
		if TcpStream::connect((UPSTREAM_HOST, port)).await.is_ok() {
			debug!(target = "tabcast.driver", port, attempts, "driver stream ready");
			return true;
		}
		if tokio::time::Instant::now() + READY_POLL > deadline {
			return false;
		}
		tokio::time::sleep(READY_POLL).await;
	}
}

fn spawn_pump(key: SessionKey, socket: UpstreamSocket, publisher: FramePublisher) -> Upstream {
	let (input_tx, input_rx) = mpsc::unbounded_channel();
	let pump = tokio::spawn(pump_upstream(key, socket, publisher, input_rx));
	Upstream { input_tx, pump }
}

async fn pump_upstream(key: SessionKey, socket: UpstreamSocket, publisher: FramePublisher, mut input_rx: mpsc::UnboundedReceiver<InputEvent>) {
	let (mut sink, mut stream) = socket.split();
	let mut viewport = Viewport::default();

	loop {
		tokio::select! {
			msg = stream.next() => match msg {
				Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
					Ok(ServerMessage::Frame(frame)) => {
						viewport = frame.metadata.viewport();
						if !publisher.publish(frame) {
							break;
						}
					}
					Ok(ServerMessage::Status(status)) => {
						viewport = status.viewport();
						if !publisher.set_status(status.capturing, viewport) {
							break;
						}
					}
					Ok(_) => {}
					Err(err) => debug!(target = "tabcast.driver", session = key.short(), error = %err, "ignoring upstream message"),
				},
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(target = "tabcast.driver", session = key.short(), error = %err, "upstream stream failed");
					break;
				}
			},
			event = input_rx.recv() => {
				let Some(event) = event else { break };
				let text = match serde_json::to_string(&ClientMessage::Input { event }) {
					Ok(text) => text,
					Err(err) => {
						warn!(target = "tabcast.driver", session = key.short(), error = %err, "failed to encode input");
						continue;
					}
				};
				if let Err(err) = sink.send(Message::Text(text)).await {
					warn!(target = "tabcast.driver", session = key.short(), error = %err, "failed to forward input");
					break;
				}
			}
		}
	}

	publisher.set_status(false, viewport);
	debug!(target = "tabcast.driver", session = key.short(), "upstream pump finished");
}
