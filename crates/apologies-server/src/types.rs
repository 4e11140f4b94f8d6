//! Shared types for the coordination server.
//!
//! This module defines:
//! - `ConnectionKey`: a lightweight handle for accepted sockets
//! - the outbound channel between the coordinator and writer tasks
//! - `CoordinatorEvent`: everything that can enter the mailbox

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

/// Identifier for an accepted connection.
///
/// This is intentionally opaque; we just guarantee uniqueness over the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey(pub u64);

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Instructions for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write one text frame.
    Frame(String),

    /// Close the socket and stop writing.
    Close,
}

/// Bound of the per-connection write buffer. A client that cannot keep
/// up overflows it and is dropped rather than blocking the coordinator.
pub const OUTBOUND_BUFFER: usize = 256;

pub type OutboundTx = mpsc::Sender<Outbound>;
pub type OutboundRx = mpsc::Receiver<Outbound>;

/// Which periodic sweep fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    IdleWebsocket,
    IdlePlayer,
    IdleGame,
    ObsoleteGame,
}

/// An event entering the coordinator mailbox. Events are processed one
/// at a time to completion, which gives a total order on every state
/// transition.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A socket finished its handshake and is ready to receive frames.
    ConnectionOpened {
        key: ConnectionKey,
        tx: OutboundTx,
    },

    /// A text frame arrived from a client.
    Request { key: ConnectionKey, text: String },

    /// A socket closed (remote close, read error, or failed send).
    ConnectionClosed { key: ConnectionKey },

    /// A periodic sweep fired. `in_flight` is cleared when processing
    /// starts so the scanner can coalesce ticks.
    Sweep {
        kind: SweepKind,
        in_flight: Option<Arc<AtomicBool>>,
    },

    /// Graceful stop requested.
    Shutdown,
}

pub type EventTx = mpsc::UnboundedSender<CoordinatorEvent>;
pub type EventRx = mpsc::UnboundedReceiver<CoordinatorEvent>;
