//! Browser session management and live viewport streaming.
//!
//! `tabcast` maps caller-chosen session keys (typically conversation threads) to
//! isolated browser sessions, each with its own stream port. Captured frames are
//! fanned out to any number of WebSocket viewers, viewer input is forwarded back to
//! the browser, and sessions nobody touches are reclaimed in the background.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tabcast::{SessionKey, SessionRegistry, StreamConfig};
//!
//! let registry = SessionRegistry::new(StreamConfig::default(), Arc::new(my_runner))?;
//! let reaper = registry.spawn_reaper();
//!
//! let key = SessionKey::new("thread-1")?;
//! let session = registry.ensure_active(&key).await?;
//! println!("watch at {}", session.stream_url);
//!
//! registry.execute(&key, &["open".into(), "https://example.com".into()]).await?;
//! registry.close(&key).await?;
//! ```
//!
//! The browser itself is driven through the [`CommandRunner`] trait.

pub mod config;
pub mod error;
pub mod port;
pub mod reaper;
pub mod reconnect;
pub mod registry;
pub mod relay;
pub mod runner;
pub mod session;
pub mod testing;

pub use config::StreamConfig;
pub use error::{Error, Result};
pub use port::PortAllocator;
pub use reaper::ReaperHandle;
pub use reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy};
pub use registry::SessionRegistry;
pub use relay::{FramePublisher, StreamRelay, ViewerHandle, ViewerMessage, ViewerState};
pub use runner::{CaptureTarget, CommandRunner, RunnerError, StreamEndpoint};
pub use session::{ActivityClock, Session, SessionKey};
