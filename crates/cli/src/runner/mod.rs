//! Command runners backed by real browser drivers.

mod agent_browser;

pub use agent_browser::{AgentBrowserRunner, BrowserTarget};

#[cfg(test)]
mod tests;
