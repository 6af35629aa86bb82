//! Wire types shared by the tabcast daemon, its viewers, and its control clients.
//!
//! Two protocols live here:
//!
//! - The **viewport stream** spoken over a session's WebSocket endpoint
//!   (`ws://<host>:<port>/`). The server sends [`ServerMessage`]s; viewers send
//!   [`ClientMessage`]s. Every message is a JSON text frame tagged by `type`.
//! - The **session control** payloads returned by the daemon's JSON-RPC surface
//!   ([`SessionInfo`], [`CommandOutput`]).
//!
//! # Main Types
//!
//! - [`ServerMessage`] - status, frame, and error messages sent to viewers
//! - [`ClientMessage`] - input and keep-alive messages sent by viewers
//! - [`StreamFrame`] - one encoded viewport image plus [`FrameMetadata`]
//! - [`InputEvent`] - pointer, keyboard, or touch input relayed to the browser

pub mod input;
pub mod session;
pub mod stream;

pub use input::{InputEvent, KeyboardEvent, KeyboardEventKind, Modifiers, PointerButton, PointerEvent, PointerEventKind, TouchEvent, TouchEventKind, TouchPoint};
pub use session::{CommandOutput, SessionInfo};
pub use stream::{ClientMessage, FrameMetadata, ServerMessage, StatusMessage, StreamFrame, Viewport};
