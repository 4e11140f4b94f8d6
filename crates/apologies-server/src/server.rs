//! Listener and top-level server wiring.
//!
//! This module:
//! - Binds the TCP listener.
//! - Spawns the single coordinator task that owns all state.
//! - Spawns the periodic sweepers.
//! - Accepts connections, assigning each a `ConnectionKey` and a
//!   per-connection I/O task.
//! - On SIGINT/SIGTERM, stops accepting, enqueues the shutdown event,
//!   and waits (bounded by `close_timeout_sec`) for the coordinator to
//!   broadcast SERVER_SHUTDOWN and drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client;
use crate::clock::SystemClock;
use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::scanner;
use crate::types::{ConnectionKey, CoordinatorEvent};

/// Global-ish counter for assigning unique `ConnectionKey`s.
static NEXT_CONNECTION_KEY: AtomicU64 = AtomicU64::new(1);

fn next_connection_key() -> ConnectionKey {
    ConnectionKey(NEXT_CONNECTION_KEY.fetch_add(1, Ordering::Relaxed))
}

/// Run the server with the given configuration until a shutdown signal
/// arrives.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!("listening on {}", addr);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(config.clone(), Arc::new(SystemClock), event_tx.clone());
    let coordinator_task = tokio::spawn(coordinator.run(event_rx));
    let sweepers = scanner::spawn_sweepers(&config, event_tx.clone());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let key = next_connection_key();
                    debug!("accepted {} from {}", key, peer);
                    tokio::spawn(client::run_connection(stream, key, event_tx.clone()));
                }
                Err(err) => {
                    warn!("accept failed: {}", err);
                }
            }
        }
    }

    // Refuse new connections, then let the coordinator broadcast the
    // shutdown and flush outbound buffers within the drain limit.
    drop(listener);
    for sweeper in sweepers {
        sweeper.abort();
    }
    let _ = event_tx.send(CoordinatorEvent::Shutdown);
    let drain = Duration::from_secs(config.close_timeout_sec);
    if tokio::time::timeout(drain, coordinator_task).await.is_err() {
        warn!("coordinator did not drain within {:?}", drain);
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
