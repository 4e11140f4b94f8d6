//! Per-connection WebSocket handler.
//!
//! Responsibilities:
//! - Perform the WebSocket handshake on an accepted TCP stream.
//! - Announce the connection to the coordinator with its outbound
//!   channel.
//! - Forward text frames into the coordinator mailbox.
//! - Concurrently drain the outbound channel onto the socket.
//! - Report the close so the coordinator can run the disconnect
//!   cascade.
//!
//! No shared state is touched here; everything flows through events.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::types::{ConnectionKey, CoordinatorEvent, EventTx, Outbound, OUTBOUND_BUFFER};

/// Run the I/O loops for a single connection until it closes.
pub async fn run_connection(stream: TcpStream, key: ConnectionKey, events: EventTx) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!("websocket handshake failed for {}: {}", key, err);
            return;
        }
    };
    debug!("websocket connection established: {}", key);
    let (mut sink, mut source) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    if events
        .send(CoordinatorEvent::ConnectionOpened { key, tx: out_tx })
        .is_err()
    {
        return;
    }

    // Writer: drains the bounded outbound buffer onto the socket. The
    // task ends when the coordinator drops the sender (connection
    // removed) or after an explicit close.
    let writer = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader: forwards text frames as request events.
    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Text(text)) => {
                if events
                    .send(CoordinatorEvent::Request { key, text })
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!("binary frame on {}; the protocol is text-only", key);
                break;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the library
            Err(err) => {
                debug!("read error on {}: {}", key, err);
                break;
            }
        }
    }

    let _ = events.send(CoordinatorEvent::ConnectionClosed { key });
    let _ = writer.await;
    debug!("connection finished: {}", key);
}
