//! Central coordinator loop.
//!
//! This task owns the [`StateStore`] and processes every event that can
//! touch it: client requests, connection lifecycle changes, sweep
//! ticks, and shutdown. Events are consumed from one mailbox and
//! handled to completion, one at a time, which gives a global total
//! order on state transitions without any finer-grained locking. The
//! handler bodies never await; suspension exists only while waiting for
//! the next event.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::dispatcher::{dispatch, Outbox};
use crate::store::{Limits, StateStore};
use crate::types::{CoordinatorEvent, EventRx, EventTx};

/// The single serialization point for all state mutation.
pub struct Coordinator {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) store: StateStore,
    pub(crate) outbox: Outbox,
    pub(crate) feedback: EventTx,
}

impl Coordinator {
    /// Create a coordinator. `feedback` must be a sender for the same
    /// mailbox the coordinator consumes, so the dispatcher can report
    /// dead connections back into the pipeline.
    pub fn new(config: Arc<ServerConfig>, clock: Arc<dyn Clock>, feedback: EventTx) -> Self {
        let limits = Limits::from_config(&config);
        Coordinator {
            config,
            store: StateStore::new(clock, limits),
            outbox: Outbox::new(),
            feedback,
        }
    }

    /// Read access to the store, for tests and diagnostics.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Process one event to completion and flush the outbox. Returns
    /// false once the coordinator should stop.
    pub fn handle_event(&mut self, event: CoordinatorEvent) -> bool {
        let keep_running = match event {
            CoordinatorEvent::ConnectionOpened { key, tx } => {
                self.on_connection_opened(key, tx);
                true
            }
            CoordinatorEvent::Request { key, text } => {
                self.on_request(key, text);
                true
            }
            CoordinatorEvent::ConnectionClosed { key } => {
                self.on_connection_closed(key);
                true
            }
            CoordinatorEvent::Sweep { kind, in_flight } => {
                if let Some(flag) = in_flight {
                    flag.store(false, Ordering::Release);
                }
                debug!("SCHEDULED[{:?}]", kind);
                self.on_sweep(kind);
                true
            }
            CoordinatorEvent::Shutdown => {
                info!("EVENT[Server Shutdown]");
                self.on_shutdown();
                false
            }
        };
        if !self.outbox.is_empty() {
            dispatch(&mut self.store, &mut self.outbox, &self.feedback);
        }
        keep_running
    }

    /// Consume the mailbox until shutdown or until every sender is
    /// dropped.
    pub async fn run(mut self, mut mailbox: EventRx) {
        while let Some(event) = mailbox.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        info!("coordinator loop finished");
    }
}
