//! Command-line front end and daemon for tabcast browser sessions.

pub mod cli;
pub mod commands;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod output;
pub mod runner;
