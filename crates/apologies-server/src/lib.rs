//! apologies-server
//!
//! Multi-client WebSocket coordination server for the Apologies game.
//!
//! This crate glues together:
//! - `apologies-engine`
//! - `apologies-protocol`
//! and exposes a `server::run(ServerConfig)` entrypoint.
//!
//! All mutable state lives in a single coordinator task; socket reader
//! and writer tasks, the periodic sweepers, and the signal handler only
//! enqueue events into its mailbox.

pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod scanner;
pub mod server;
pub mod store;
pub mod types;
