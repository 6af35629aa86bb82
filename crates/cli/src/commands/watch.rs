use std::io::Write;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tabcast::{ConnectionState, ReconnectMachine, ReconnectPolicy};
use tabcast_protocol::ServerMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::cli::WatchArgs;
use crate::error::{CliError, Result};
use crate::output::{OutputFormat, ResultBuilder, print_event, print_result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a live connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Ended {
	/// The frame limit was reached; stop watching.
	Done,
	/// The socket closed or failed; reconnect.
	Lost,
}

pub async fn run(args: WatchArgs, format: OutputFormat) -> Result<()> {
	validate_url(&args.url)?;
	let mut machine = ReconnectMachine::new(policy_from_args(&args));
	let mut frames = 0u64;

	let mut state = machine.connect();
	loop {
		match state {
			ConnectionState::Connecting { attempt } => {
				emit(format, json!({ "event": "connecting", "url": args.url, "attempt": attempt }));
				match connect_async(args.url.as_str()).await {
					Ok((socket, _)) => {
						machine.on_connected();
						emit(format, json!({ "event": "connected", "url": args.url }));
						match consume(socket, &mut machine, &mut frames, args.frames, format).await {
							Ended::Done => {
								machine.close();
								break;
							}
							Ended::Lost => state = machine.on_disconnected(),
						}
					}
					Err(err) => {
						emit(format, json!({ "event": "connect_failed", "error": err.to_string() }));
						state = machine.on_disconnected();
					}
				}
			}
			ConnectionState::Reconnecting { attempt, delay } => {
				emit(
					format,
					json!({ "event": "reconnecting", "attempt": attempt, "delayMs": delay.as_millis() as u64 }),
				);
				tokio::time::sleep(delay).await;
				state = machine.retry_now();
			}
			ConnectionState::Failed { attempts } => return Err(CliError::ConnectionLost { attempts }),
			ConnectionState::Connected | ConnectionState::Idle => break,
		}
	}

	let result = ResultBuilder::new("watch").data(json!({ "url": args.url, "frames": frames })).build();
	print_result(&result, format);
	Ok(())
}

fn validate_url(url: &str) -> Result<()> {
	if url.starts_with("ws://") || url.starts_with("wss://") {
		Ok(())
	} else {
		Err(CliError::InvalidArgument(format!("stream url must start with ws:// or wss://, got '{url}'")))
	}
}

fn policy_from_args(args: &WatchArgs) -> ReconnectPolicy {
	ReconnectPolicy {
		initial_delay: Duration::from_millis(args.initial_delay_ms),
		max_delay: Duration::from_millis(args.max_delay_ms.max(args.initial_delay_ms)),
		max_attempts: args.max_attempts,
	}
}

async fn consume(socket: Socket, machine: &mut ReconnectMachine, frames: &mut u64, limit: Option<u64>, format: OutputFormat) -> Ended {
	let (mut sink, mut stream) = socket.split();

	while let Some(msg) = stream.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
				Ok(ServerMessage::Status(status)) => {
					machine.on_status(status);
					emit(format, json!({ "event": "status", "status": status }));
				}
				Ok(ServerMessage::Frame(frame)) => {
					*frames += 1;
					emit(
						format,
						json!({
							"event": "frame",
							"seq": *frames,
							"bytes": frame.data.len(),
							"width": frame.metadata.device_width,
							"height": frame.metadata.device_height,
							"timestamp": frame.timestamp,
						}),
					);
					if limit.is_some_and(|limit| *frames >= limit) {
						let _ = sink.send(Message::Close(None)).await;
						return Ended::Done;
					}
				}
				Ok(ServerMessage::Error { message }) => emit(format, json!({ "event": "error", "message": message })),
				Ok(ServerMessage::Pong) => {}
				Err(err) => debug!(target = "tabcast.watch", error = %err, "ignoring unrecognized message"),
			},
			Ok(Message::Close(frame)) => {
				let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
				emit(format, json!({ "event": "closed", "reason": reason }));
				return Ended::Lost;
			}
			Ok(_) => {}
			Err(err) => {
				emit(format, json!({ "event": "disconnected", "error": err.to_string() }));
				return Ended::Lost;
			}
		}
	}

	emit(format, json!({ "event": "disconnected" }));
	Ended::Lost
}

fn emit(format: OutputFormat, event: Value) {
	match format {
		OutputFormat::Json => print_event(&event),
		OutputFormat::Text => {
			let name = event.get("event").and_then(Value::as_str).unwrap_or("event");
			let mut stdout = std::io::stdout().lock();
			let _ = writeln!(stdout, "{name}: {event}");
		}
	}
}
