//! Reconnection state machine for stream viewers.
//!
//! The machine is pure: it never sleeps or opens sockets. The driver (for example
//! `tabcast watch`) feeds it connection events and acts on the [`ConnectionState`]
//! it reports, waiting out the delay in [`ConnectionState::Reconnecting`] before
//! calling [`ReconnectMachine::retry_now`].
//!
//! ```text
//! Idle -> Connecting -> Connected
//!             ^    \        |
//!             |     v       v
//!             +-- Reconnecting(attempt) -> Failed -> (manual retry) -> Connecting
//! ```

use std::time::Duration;

use tabcast_protocol::StatusMessage;

/// Backoff settings for automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	pub initial_delay: Duration,
	pub max_delay: Duration,
	/// Automatic attempts made after a disconnect before giving up.
	pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			max_attempts: 5,
		}
	}
}

impl ReconnectPolicy {
	/// Delay before automatic attempt `attempt` (1-based): doubles from the initial
	/// delay and is capped at the maximum.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(31);
		self.initial_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	/// A connection attempt is in flight. `attempt` is 0 for the first connect.
	Connecting { attempt: u32 },
	Connected,
	/// Waiting `delay` before automatic attempt `attempt`.
	Reconnecting { attempt: u32, delay: Duration },
	/// Automatic retries are exhausted. Only [`ReconnectMachine::manual_retry`] leaves this state.
	Failed { attempts: u32 },
}

impl ConnectionState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, ConnectionState::Failed { .. })
	}
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
	policy: ReconnectPolicy,
	state: ConnectionState,
	/// Automatic attempts since the relay last confirmed a connection with a status.
	attempts: u32,
	last_status: Option<StatusMessage>,
}

impl Default for ReconnectMachine {
	fn default() -> Self {
		Self::new(ReconnectPolicy::default())
	}
}

impl ReconnectMachine {
	pub fn new(policy: ReconnectPolicy) -> Self {
		Self {
			policy,
			state: ConnectionState::Idle,
			attempts: 0,
			last_status: None,
		}
	}

	pub fn policy(&self) -> &ReconnectPolicy {
		&self.policy
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}

	/// The most recent status received from the relay.
	pub fn last_status(&self) -> Option<&StatusMessage> {
		self.last_status.as_ref()
	}

	/// Starts the first connection. Ignored unless idle.
	pub fn connect(&mut self) -> ConnectionState {
		if self.state == ConnectionState::Idle {
			self.attempts = 0;
			self.state = ConnectionState::Connecting { attempt: 0 };
		}
		self.state
	}

	/// The socket opened. The attempt counter survives until the first status arrives,
	/// so an endpoint that accepts and immediately hangs up still exhausts retries.
	pub fn on_connected(&mut self) -> ConnectionState {
		if matches!(self.state, ConnectionState::Connecting { .. }) {
			self.state = ConnectionState::Connected;
		}
		self.state
	}

	/// Records a status message. A status with `capturing = false` is normal: the
	/// session exists but no frames are flowing yet.
	pub fn on_status(&mut self, status: StatusMessage) -> ConnectionState {
		match self.state {
			ConnectionState::Connecting { .. } | ConnectionState::Connected => {
				self.state = ConnectionState::Connected;
				self.attempts = 0;
			}
			ConnectionState::Idle | ConnectionState::Reconnecting { .. } | ConnectionState::Failed { .. } => {}
		}
		self.last_status = Some(status);
		self.state
	}

	/// The connection dropped or a connection attempt failed.
	pub fn on_disconnected(&mut self) -> ConnectionState {
		let attempt = match self.state {
			ConnectionState::Connected | ConnectionState::Connecting { .. } => self.attempts + 1,
			// Disconnect notifications outside a live connection carry no information.
			ConnectionState::Idle | ConnectionState::Reconnecting { .. } | ConnectionState::Failed { .. } => return self.state,
		};
		self.state = if attempt > self.policy.max_attempts {
			ConnectionState::Failed { attempts: attempt - 1 }
		} else {
			ConnectionState::Reconnecting {
				attempt,
				delay: self.policy.delay_for(attempt),
			}
		};
		self.state
	}

	/// The reconnect delay elapsed; begin the scheduled attempt.
	pub fn retry_now(&mut self) -> ConnectionState {
		if let ConnectionState::Reconnecting { attempt, .. } = self.state {
			self.attempts = attempt;
			self.state = ConnectionState::Connecting { attempt };
		}
		self.state
	}

	/// User-requested retry. Restarts the backoff from the initial delay.
	pub fn manual_retry(&mut self) -> ConnectionState {
		self.attempts = 0;
		self.state = ConnectionState::Connecting { attempt: 0 };
		self.state
	}

	/// The viewer chose to disconnect. No reconnection follows.
	pub fn close(&mut self) -> ConnectionState {
		self.state = ConnectionState::Idle;
		self.state
	}
}
