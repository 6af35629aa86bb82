//! Input events relayed from viewers to the browser driver.
//!
//! Coordinates are CSS pixels relative to the viewport reported in the last
//! status message. Modifier bits follow the Chrome DevTools convention so the
//! driver can forward them without translation.

use serde::{Deserialize, Serialize};

/// Keyboard modifier bitmask (`alt = 1`, `ctrl = 2`, `meta = 4`, `shift = 8`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(pub u8);

impl Modifiers {
	pub const NONE: Self = Self(0);
	pub const ALT: Self = Self(1);
	pub const CTRL: Self = Self(2);
	pub const META: Self = Self(4);
	pub const SHIFT: Self = Self(8);

	pub fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}
}

impl std::ops::BitOr for Modifiers {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerEventKind {
	Move,
	Down,
	Up,
	Wheel,
	Click,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
	#[default]
	None,
	Left,
	Middle,
	Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerEvent {
	pub kind: PointerEventKind,
	pub x: f64,
	pub y: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub button: Option<PointerButton>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub click_count: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delta_x: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delta_y: Option<f64>,
	#[serde(default, skip_serializing_if = "Modifiers::is_empty")]
	pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardEventKind {
	Down,
	Up,
	Press,
	/// Text insertion without a key code (IME output, paste).
	Char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardEvent {
	pub kind: KeyboardEventKind,
	/// DOM `KeyboardEvent.key` value, e.g. `"Enter"` or `"a"`.
	pub key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Modifiers::is_empty")]
	pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchEventKind {
	Start,
	Move,
	End,
	Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
	pub x: f64,
	pub y: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
	pub kind: TouchEventKind,
	#[serde(default)]
	pub points: Vec<TouchPoint>,
	#[serde(default, skip_serializing_if = "Modifiers::is_empty")]
	pub modifiers: Modifiers,
}

/// A viewer-originated input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
	Pointer(PointerEvent),
	Keyboard(KeyboardEvent),
	#[serde(alias = "multi_touch")]
	Touch(TouchEvent),
}

impl InputEvent {
	/// Short name used in logs.
	pub fn kind_name(&self) -> &'static str {
		match self {
			InputEvent::Pointer(_) => "pointer",
			InputEvent::Keyboard(_) => "keyboard",
			InputEvent::Touch(_) => "touch",
		}
	}

	/// Rejects events the browser driver cannot act on.
	///
	/// Coordinates must be finite, keyboard events need a key (or text for
	/// [`KeyboardEventKind::Char`]), and touch start/move events need at least one
	/// point.
	pub fn validate(&self) -> Result<(), String> {
		match self {
			InputEvent::Pointer(ev) => {
				if !ev.x.is_finite() || !ev.y.is_finite() {
					return Err("pointer coordinates must be finite".to_string());
				}
				let deltas = [ev.delta_x, ev.delta_y];
				if deltas.iter().flatten().any(|d| !d.is_finite()) {
					return Err("wheel deltas must be finite".to_string());
				}
				Ok(())
			}
			InputEvent::Keyboard(ev) => {
				let has_text = ev.text.as_deref().is_some_and(|t| !t.is_empty());
				match ev.kind {
					KeyboardEventKind::Char if !has_text && ev.key.is_empty() => Err("char events need text".to_string()),
					KeyboardEventKind::Char => Ok(()),
					_ if ev.key.is_empty() => Err("keyboard events need a key".to_string()),
					_ => Ok(()),
				}
			}
			InputEvent::Touch(ev) => {
				if matches!(ev.kind, TouchEventKind::Start | TouchEventKind::Move) && ev.points.is_empty() {
					return Err("touch start/move events need at least one point".to_string());
				}
				if ev.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
					return Err("touch coordinates must be finite".to_string());
				}
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn keyboard_event_wire_shape() {
		let event = InputEvent::Keyboard(KeyboardEvent {
			kind: KeyboardEventKind::Press,
			key: "Enter".to_string(),
			code: Some("Enter".to_string()),
			text: None,
			modifiers: Modifiers::CTRL | Modifiers::SHIFT,
		});
		assert_eq!(
			serde_json::to_value(&event).unwrap(),
			json!({ "type": "keyboard", "kind": "press", "key": "Enter", "code": "Enter", "modifiers": 10 })
		);
	}

	#[test]
	fn empty_modifiers_are_omitted() {
		let event = InputEvent::Pointer(PointerEvent {
			kind: PointerEventKind::Click,
			x: 5.0,
			y: 6.0,
			button: None,
			click_count: Some(1),
			delta_x: None,
			delta_y: None,
			modifiers: Modifiers::NONE,
		});
		assert_eq!(
			serde_json::to_value(&event).unwrap(),
			json!({ "type": "pointer", "kind": "click", "x": 5.0, "y": 6.0, "clickCount": 1 })
		);
	}

	#[test]
	fn multi_touch_alias_is_accepted() {
		let raw = json!({ "type": "multi_touch", "kind": "start", "points": [{ "x": 1.0, "y": 2.0, "id": 0 }, { "x": 3.0, "y": 4.0 }] });
		let event: InputEvent = serde_json::from_value(raw).unwrap();
		let InputEvent::Touch(touch) = &event else {
			panic!("expected touch event");
		};
		assert_eq!(touch.points.len(), 2);
		assert_eq!(event.kind_name(), "touch");
		assert!(event.validate().is_ok());
	}

	#[test]
	fn modifiers_contains() {
		let mods = Modifiers::ALT | Modifiers::META;
		assert!(mods.contains(Modifiers::ALT));
		assert!(!mods.contains(Modifiers::CTRL));
		assert!(Modifiers::NONE.is_empty());
	}

	#[test]
	fn validate_rejects_non_finite_pointer() {
		let event = InputEvent::Pointer(PointerEvent {
			kind: PointerEventKind::Move,
			x: f64::NAN,
			y: 0.0,
			button: None,
			click_count: None,
			delta_x: None,
			delta_y: None,
			modifiers: Modifiers::NONE,
		});
		assert!(event.validate().is_err());
	}

	#[test]
	fn validate_rejects_empty_touch_start() {
		let event = InputEvent::Touch(TouchEvent {
			kind: TouchEventKind::Start,
			points: vec![],
			modifiers: Modifiers::NONE,
		});
		assert!(event.validate().is_err());

		let end = InputEvent::Touch(TouchEvent {
			kind: TouchEventKind::End,
			points: vec![],
			modifiers: Modifiers::NONE,
		});
		assert!(end.validate().is_ok());
	}

	#[test]
	fn validate_keyboard_requires_key() {
		let event = InputEvent::Keyboard(KeyboardEvent {
			kind: KeyboardEventKind::Down,
			key: String::new(),
			code: None,
			text: None,
			modifiers: Modifiers::NONE,
		});
		assert!(event.validate().is_err());
	}
}
