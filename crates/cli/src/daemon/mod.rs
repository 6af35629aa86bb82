//! Session daemon: a JSON-RPC control endpoint over HTTP in front of a
//! [`tabcast::SessionRegistry`].

mod client;
mod rpc;
mod server;

pub use client::{connect_client, map_client_error, probe};
pub use rpc::{SESSION_ERROR_CODE, SessionRpcClient, SessionRpcServer, SessionService};
pub use server::Daemon;
