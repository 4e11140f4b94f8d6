//! Outbound event dispatch.
//!
//! Handlers never write to sockets; they enqueue `(audience, event)`
//! pairs into an [`Outbox`], and the coordinator drains it after each
//! handler completes. Dispatch resolves each audience to live
//! connections, serializes the payload once, and attempts a
//! non-blocking send on every target. A failed or overflowing send
//! marks the connection dead and feeds a ConnectionClosed event back
//! into the mailbox; the actual socket close is idempotent.
//!
//! Messages enqueued by a single handler are delivered in the order
//! emitted and per-connection FIFO is preserved. Requested closes are
//! performed only after every message has been buffered, so a final
//! notification still reaches a connection that is about to close.

use indexmap::IndexSet;
use tracing::{debug, error};

use apologies_protocol::{encode_event, Event};

use crate::ids::{GameId, PlayerId};
use crate::store::StateStore;
use crate::types::{ConnectionKey, CoordinatorEvent, EventTx, Outbound};

/// Who should receive an event.
#[derive(Debug, Clone)]
pub enum Audience {
    /// One specific connection, registered or not.
    Connection(ConnectionKey),

    /// One player, if currently connected.
    Player(PlayerId),

    /// A set of players; disconnected ones are skipped.
    Players(Vec<PlayerId>),

    /// Every human seated in a game, connected ones only.
    Game(GameId),

    /// Every connection currently bound to a player.
    AllConnected,
}

/// Events queued by a handler, drained by [`dispatch`].
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<(Audience, Event)>,
    closes: IndexSet<ConnectionKey>,
}

impl Outbox {
    pub fn new() -> Self {
        Outbox::default()
    }

    /// Enqueue an event for an audience.
    pub fn push(&mut self, audience: Audience, event: Event) {
        self.messages.push((audience, event));
    }

    /// Request that a connection be closed once messages are sent.
    pub fn push_close(&mut self, key: ConnectionKey) {
        self.closes.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.closes.is_empty()
    }
}

/// Drain the outbox into per-connection write buffers.
pub fn dispatch(store: &mut StateStore, outbox: &mut Outbox, feedback: &EventTx) {
    let messages = std::mem::take(&mut outbox.messages);
    let closes = std::mem::take(&mut outbox.closes);
    let mut dead: IndexSet<ConnectionKey> = IndexSet::new();

    for (audience, event) in messages {
        let text = match encode_event(&event) {
            Ok(text) => text,
            Err(err) => {
                error!("failed to serialize outbound event: {}", err);
                continue;
            }
        };
        for key in resolve(store, &audience) {
            let Some(conn) = store.connection(&key) else {
                continue;
            };
            if conn.dead || dead.contains(&key) {
                continue;
            }
            if conn.tx.try_send(Outbound::Frame(text.clone())).is_err() {
                debug!("send to {} failed, marking connection dead", key);
                dead.insert(key);
            }
        }
    }

    for key in closes {
        if let Some(conn) = store.connection(&key) {
            let _ = conn.tx.try_send(Outbound::Close);
        }
    }

    for key in dead {
        store.mark_connection_dead(&key);
        let _ = feedback.send(CoordinatorEvent::ConnectionClosed { key });
    }
}

fn resolve(store: &StateStore, audience: &Audience) -> Vec<ConnectionKey> {
    match audience {
        Audience::Connection(key) => vec![*key],
        Audience::Player(player_id) => store
            .connection_for_player(player_id)
            .into_iter()
            .collect(),
        Audience::Players(player_ids) => player_ids
            .iter()
            .filter_map(|id| store.connection_for_player(id))
            .collect(),
        Audience::Game(game_id) => match store.game(game_id) {
            Some(game) => game
                .seated_player_ids()
                .iter()
                .filter_map(|id| store.connection_for_player(id))
                .collect(),
            None => Vec::new(),
        },
        Audience::AllConnected => store
            .connection_keys()
            .into_iter()
            .filter(|key| {
                store
                    .connection(key)
                    .map(|c| c.player_id.is_some() && !c.dead)
                    .unwrap_or(false)
            })
            .collect(),
    }
}
