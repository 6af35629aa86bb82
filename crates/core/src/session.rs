//! Session identity and the snapshot type handed out by the registry.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tabcast_protocol::{SessionInfo, Viewport};
use tokio::time::Instant;

use crate::error::{Error, Result};

const MAX_KEY_LEN: usize = 256;

/// Caller-supplied identifier for a browser session, usually a conversation thread id.
///
/// Keys are passed to the browser driver as a command-line argument, so they must be
/// non-empty, reasonably short, and free of control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(Arc<str>);

impl SessionKey {
	pub fn new(key: impl Into<String>) -> Result<Self> {
		let key = key.into();
		if key.trim().is_empty() {
			return Err(Error::InvalidKey("session key must not be empty".to_string()));
		}
		if key.len() > MAX_KEY_LEN {
			return Err(Error::InvalidKey(format!("session key too long ({} bytes, max {MAX_KEY_LEN})", key.len())));
		}
		if key.chars().any(char::is_control) {
			return Err(Error::InvalidKey("session key contains control characters".to_string()));
		}
		Ok(Self(Arc::from(key)))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// First eight characters, for log lines that would otherwise carry long uuids.
	pub fn short(&self) -> &str {
		match self.0.char_indices().nth(8) {
			Some((idx, _)) => &self.0[..idx],
			None => &self.0,
		}
	}
}

impl fmt::Display for SessionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for SessionKey {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::new(value)
	}
}

impl TryFrom<&str> for SessionKey {
	type Error = Error;

	fn try_from(value: &str) -> Result<Self> {
		Self::new(value)
	}
}

impl From<SessionKey> for String {
	fn from(key: SessionKey) -> Self {
		key.0.to_string()
	}
}

impl AsRef<str> for SessionKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Last-interaction timestamp shared between a registry entry and its relay.
///
/// Updates never move the clock backwards, so the observed sequence of
/// timestamps is non-decreasing even when touches race.
#[derive(Debug)]
pub struct ActivityClock {
	last: Mutex<Instant>,
}

impl ActivityClock {
	pub fn new(now: Instant) -> Self {
		Self { last: Mutex::new(now) }
	}

	/// Records an interaction at the current time and returns the stored timestamp.
	pub fn touch(&self) -> Instant {
		self.touch_at(Instant::now())
	}

	pub fn touch_at(&self, at: Instant) -> Instant {
		let mut last = self.last.lock();
		if at > *last {
			*last = at;
		}
		*last
	}

	pub fn last(&self) -> Instant {
		*self.last.lock()
	}

	pub fn idle_for(&self) -> Duration {
		self.last().elapsed()
	}
}

/// Point-in-time copy of a registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
	pub key: SessionKey,
	pub port: u16,
	pub active: bool,
	pub created_at: Instant,
	pub last_activity_at: Instant,
	pub viewer_count: usize,
	pub capturing: bool,
	pub viewport: Viewport,
	pub stream_url: String,
}

impl Session {
	pub fn idle_for(&self) -> Duration {
		self.last_activity_at.elapsed()
	}

	/// Converts to the serializable form, translating monotonic instants to wall-clock
	/// milliseconds relative to now.
	pub fn to_info(&self) -> SessionInfo {
		let now_ms = unix_millis(SystemTime::now());
		let since_created = duration_millis(self.created_at.elapsed());
		let idle = duration_millis(self.idle_for());
		SessionInfo {
			key: self.key.to_string(),
			port: self.port,
			active: self.active,
			stream_url: self.stream_url.clone(),
			viewer_count: self.viewer_count,
			capturing: self.capturing,
			viewport_width: self.viewport.width,
			viewport_height: self.viewport.height,
			created_at_ms: now_ms.saturating_sub(since_created),
			last_activity_at_ms: now_ms.saturating_sub(idle),
			idle_ms: idle,
		}
	}
}

pub(crate) fn unix_millis(at: SystemTime) -> u64 {
	at.duration_since(UNIX_EPOCH).map(duration_millis).unwrap_or_default()
}

fn duration_millis(d: Duration) -> u64 {
	u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_blank_and_control_keys() {
		assert!(SessionKey::new("").is_err());
		assert!(SessionKey::new("   ").is_err());
		assert!(SessionKey::new("thread\n1").is_err());
		assert!(SessionKey::new("x".repeat(MAX_KEY_LEN + 1)).is_err());
		assert!(SessionKey::new("x".repeat(MAX_KEY_LEN)).is_ok());
	}

	#[test]
	fn short_truncates_on_char_boundary() {
		let key = SessionKey::new("0b9f6c1e-2f44-4b6e-9a4e-3f1c7d2a9e10").unwrap();
		assert_eq!(key.short(), "0b9f6c1e");
		let tiny = SessionKey::new("abc").unwrap();
		assert_eq!(tiny.short(), "abc");
		let wide = SessionKey::new("ééééééééé").unwrap();
		assert_eq!(wide.short(), "éééééééé");
	}

	#[test]
	fn key_deserialization_validates() {
		let ok: SessionKey = serde_json::from_str("\"thread-1\"").unwrap();
		assert_eq!(ok.as_str(), "thread-1");
		assert!(serde_json::from_str::<SessionKey>("\"\"").is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn activity_clock_never_moves_backwards() {
		let start = Instant::now();
		let clock = ActivityClock::new(start);
		tokio::time::advance(Duration::from_secs(5)).await;
		let later = clock.touch();
		assert!(later > start);
		assert_eq!(clock.touch_at(start), later);
		assert_eq!(clock.last(), later);
	}
}
