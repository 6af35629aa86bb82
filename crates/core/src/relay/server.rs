//! WebSocket endpoint viewers connect to, one per session port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tabcast_protocol::{ClientMessage, ServerMessage, StatusMessage, StreamFrame};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{RelayShared, ViewerMessage};
use crate::error::{Error, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct ServerTask {
	pub(crate) addr: SocketAddr,
	shutdown_tx: watch::Sender<bool>,
	join: JoinHandle<()>,
}

impl ServerTask {
	/// Stops accepting connections and waits for the listener to be released.
	pub(crate) async fn stop(self) {
		let _ = self.shutdown_tx.send(true);
		let abort = self.join.abort_handle();
		if tokio::time::timeout(SHUTDOWN_GRACE, self.join).await.is_err() {
			warn!(target = "tabcast.relay", addr = %self.addr, "viewer endpoint did not stop in time, aborting");
			abort.abort();
		}
	}

	pub(crate) fn abort(self) {
		let _ = self.shutdown_tx.send(true);
		self.join.abort();
	}
}

pub(crate) async fn serve(relay: Arc<RelayShared>, host: &str) -> Result<ServerTask> {
	let port = relay.port;
	let listener = TcpListener::bind((host, port)).await.map_err(|source| Error::Bind { port, source })?;
	let addr = listener.local_addr().map_err(|source| Error::Bind { port, source })?;

	let app = Router::new()
		.route("/", get(upgrade))
		.route("/health", get(health))
		.with_state(Arc::clone(&relay));

	let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
	let key = relay.key.clone();
	let join = tokio::spawn(async move {
		let shutdown = async move {
			let _ = shutdown_rx.wait_for(|stop| *stop).await;
		};
		if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
			warn!(target = "tabcast.relay", session = %key, error = %err, "viewer endpoint failed");
		}
	});

	info!(target = "tabcast.relay", session = %relay.key, %addr, "viewer endpoint listening");
	Ok(ServerTask { addr, shutdown_tx, join })
}

async fn upgrade(ws: WebSocketUpgrade, State(relay): State<Arc<RelayShared>>) -> Response {
	ws.on_upgrade(move |socket| handle_viewer(socket, relay))
}

async fn health(State(relay): State<Arc<RelayShared>>) -> Json<Value> {
	Json(json!({
		"ok": !relay.closed.load(Ordering::Acquire),
		"session": relay.key.as_str(),
		"viewers": relay.viewers.len(),
	}))
}

/// Borrowed form of the outgoing messages, so frames shared between viewers are
/// serialized without being cloned.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outgoing<'a> {
	Status(&'a StatusMessage),
	Frame(&'a StreamFrame),
}

fn encode(message: &ViewerMessage) -> serde_json::Result<String> {
	match message {
		ViewerMessage::Status(status) => serde_json::to_string(&Outgoing::Status(status)),
		ViewerMessage::Frame(frame) => serde_json::to_string(&Outgoing::Frame(frame.as_ref())),
	}
}

fn close_message(reason: &'static str) -> Message {
	Message::Close(Some(CloseFrame {
		code: close_code::AWAY,
		reason: reason.into(),
	}))
}

async fn handle_viewer(mut socket: WebSocket, relay: Arc<RelayShared>) {
	let mut viewer = match relay.attach() {
		Ok(viewer) => viewer,
		Err(_) => {
			let _ = socket.send(close_message("session closed")).await;
			return;
		}
	};
	let viewer_id = viewer.id();
	let (mut sink, mut stream) = socket.split();

	loop {
		tokio::select! {
			next = viewer.recv() => {
				let Some(message) = next else {
					let _ = sink.send(close_message("session closed")).await;
					break;
				};
				match encode(&message) {
					Ok(text) => {
						if sink.send(Message::Text(text.into())).await.is_err() {
							break;
						}
					}
					Err(err) => warn!(target = "tabcast.relay", session = %relay.key, error = %err, "failed to encode viewer message"),
				}
			}
			incoming = stream.next() => match incoming {
				Some(Ok(Message::Text(text))) => {
					if let Some(reply) = handle_client_text(&relay, text.as_str()) {
						if sink.send(reply).await.is_err() {
							break;
						}
					}
				}
				Some(Ok(Message::Close(_))) | None => break,
				Some(Err(err)) => {
					debug!(target = "tabcast.relay", session = %relay.key, viewer = viewer_id, error = %err, "viewer socket error");
					break;
				}
				Some(Ok(_)) => {}
			}
		}
	}

	viewer.detach();
}

fn handle_client_text(relay: &RelayShared, text: &str) -> Option<Message> {
	let reply = match serde_json::from_str::<ClientMessage>(text) {
		Ok(ClientMessage::Input { event }) => match relay.submit_input(event) {
			Ok(()) => return None,
			Err(err) => ServerMessage::Error { message: err.to_string() },
		},
		Ok(ClientMessage::Ping) => ServerMessage::Pong,
		Err(err) => ServerMessage::Error {
			message: format!("malformed message: {err}"),
		},
	};
	serde_json::to_string(&reply).ok().map(|text| Message::Text(text.into()))
}
