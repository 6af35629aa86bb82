//! Viewport stream messages.
//!
//! A viewer connection always starts with a [`ServerMessage::Status`], followed by
//! any number of [`ServerMessage::Frame`]s. Viewers may send
//! [`ClientMessage::Input`] at any time after the status arrives.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::input::InputEvent;

/// Viewport dimensions reported to viewers, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
	pub width: u32,
	pub height: u32,
}

impl Viewport {
	pub const fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}
}

impl Default for Viewport {
	fn default() -> Self {
		Self::new(1280, 720)
	}
}

/// Connection status, sent to each viewer before any frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
	/// Whether the viewer is attached to a live session relay.
	pub connected: bool,
	/// Whether the browser is currently producing frames. A session can exist
	/// before capture starts; viewers must not treat `false` as an error.
	#[serde(alias = "screencasting")]
	pub capturing: bool,
	pub viewport_width: u32,
	pub viewport_height: u32,
}

impl StatusMessage {
	pub fn new(capturing: bool, viewport: Viewport) -> Self {
		Self {
			connected: true,
			capturing,
			viewport_width: viewport.width,
			viewport_height: viewport.height,
		}
	}

	pub fn viewport(&self) -> Viewport {
		Viewport::new(self.viewport_width, self.viewport_height)
	}
}

/// Device metrics captured alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
	pub device_width: u32,
	pub device_height: u32,
	#[serde(default = "default_scale_factor")]
	pub scale_factor: f64,
	#[serde(default)]
	pub scroll_offset_x: f64,
	#[serde(default)]
	pub scroll_offset_y: f64,
}

fn default_scale_factor() -> f64 {
	1.0
}

impl FrameMetadata {
	pub fn for_viewport(viewport: Viewport) -> Self {
		Self {
			device_width: viewport.width,
			device_height: viewport.height,
			scale_factor: 1.0,
			scroll_offset_x: 0.0,
			scroll_offset_y: 0.0,
		}
	}

	pub fn viewport(&self) -> Viewport {
		Viewport::new(self.device_width, self.device_height)
	}
}

/// One captured viewport image.
///
/// `data` is opaque to the relay: it is usually a base64-encoded JPEG produced by
/// the browser's screencast, and is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
	pub data: String,
	pub metadata: FrameMetadata,
	/// Capture time in milliseconds since the Unix epoch; `0` when unknown.
	#[serde(default)]
	pub timestamp: u64,
}

impl StreamFrame {
	pub fn new(data: impl Into<String>, metadata: FrameMetadata, timestamp: u64) -> Self {
		Self {
			data: data.into(),
			metadata,
			timestamp,
		}
	}

	/// Builds a frame from raw image bytes, encoding them as standard base64.
	pub fn from_image_bytes(bytes: &[u8], metadata: FrameMetadata, timestamp: u64) -> Self {
		Self::new(STANDARD.encode(bytes), metadata, timestamp)
	}

	/// Decodes the image payload, if it is valid base64.
	pub fn decode_image(&self) -> Result<Vec<u8>, base64::DecodeError> {
		STANDARD.decode(self.data.as_bytes())
	}
}

/// Message sent from the relay to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	Status(StatusMessage),
	Frame(StreamFrame),
	/// The viewer sent something the relay could not process.
	Error {
		message: String,
	},
	Pong,
}

/// Message sent from a viewer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// Forward an input event to the browser driving this session.
	Input { event: InputEvent },
	Ping,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::input::{PointerEvent, PointerEventKind};

	#[test]
	fn status_uses_camel_case_fields() {
		let msg = ServerMessage::Status(StatusMessage::new(false, Viewport::new(800, 600)));
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(
			value,
			json!({
				"type": "status",
				"connected": true,
				"capturing": false,
				"viewportWidth": 800,
				"viewportHeight": 600
			})
		);
	}

	#[test]
	fn driver_status_field_name_is_accepted() {
		let raw = r#"{"type":"status","connected":true,"screencasting":true,"viewportWidth":1024,"viewportHeight":768}"#;
		let msg: ServerMessage = serde_json::from_str(raw).unwrap();
		assert_eq!(msg, ServerMessage::Status(StatusMessage::new(true, Viewport::new(1024, 768))));
	}

	#[test]
	fn frame_metadata_defaults_missing_offsets() {
		let raw = r#"{"type":"frame","data":"AAAA","metadata":{"deviceWidth":1280,"deviceHeight":720}}"#;
		let msg: ServerMessage = serde_json::from_str(raw).unwrap();
		let ServerMessage::Frame(frame) = msg else {
			panic!("expected frame");
		};
		assert_eq!(frame.metadata.scale_factor, 1.0);
		assert_eq!(frame.metadata.scroll_offset_y, 0.0);
		assert_eq!(frame.timestamp, 0);
		assert_eq!(frame.metadata.viewport(), Viewport::new(1280, 720));
	}

	#[test]
	fn frame_payload_decodes() {
		let frame = StreamFrame::from_image_bytes(&[0xff, 0xd8, 0xff], FrameMetadata::for_viewport(Viewport::default()), 7);
		assert_eq!(frame.data, "/9j/");
		assert_eq!(frame.decode_image().unwrap(), vec![0xff, 0xd8, 0xff]);
	}

	#[test]
	fn client_input_is_nested_under_event() {
		let raw = json!({
			"type": "input",
			"event": { "type": "pointer", "kind": "click", "x": 10.0, "y": 20.5 }
		});
		let msg: ClientMessage = serde_json::from_value(raw).unwrap();
		match msg {
			ClientMessage::Input {
				event: InputEvent::Pointer(PointerEvent { kind, x, y, .. }),
			} => {
				assert_eq!(kind, PointerEventKind::Click);
				assert_eq!((x, y), (10.0, 20.5));
			}
			other => panic!("unexpected message: {other:?}"),
		}
	}

	#[test]
	fn unknown_client_message_is_rejected() {
		let err = serde_json::from_str::<ClientMessage>(r#"{"type":"resize","width":3}"#);
		assert!(err.is_err());
	}
}
