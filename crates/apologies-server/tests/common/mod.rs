//! Test harness: drives the coordinator directly, with a manual clock
//! and in-memory connections, so scenarios run deterministically and
//! without sockets.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tokio::sync::mpsc;

use apologies_protocol::requests::Request;
use apologies_protocol::Event;
use apologies_server::clock::ManualClock;
use apologies_server::config::ServerConfig;
use apologies_server::coordinator::Coordinator;
use apologies_server::types::{
    ConnectionKey, CoordinatorEvent, EventRx, Outbound, OutboundRx, SweepKind, OUTBOUND_BUFFER,
};

pub struct Harness {
    pub coordinator: Coordinator,
    pub clock: Arc<ManualClock>,
    feedback: EventRx,
    next_key: u64,
}

pub struct TestClient {
    pub key: ConnectionKey,
    rx: OutboundRx,
    pub closed: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig::default();
        configure(&mut config);
        let clock = Arc::new(ManualClock::starting_at(
            "2024-05-01T12:00:00Z".parse().expect("valid timestamp"),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(Arc::new(config), clock.clone(), tx);
        Harness {
            coordinator,
            clock,
            feedback: rx,
            next_key: 1,
        }
    }

    /// Process one event, then any feedback the dispatcher produced,
    /// then verify the store invariants.
    pub fn step(&mut self, event: CoordinatorEvent) -> bool {
        let keep_running = self.coordinator.handle_event(event);
        while let Ok(feedback) = self.feedback.try_recv() {
            self.coordinator.handle_event(feedback);
        }
        self.coordinator.store().check_invariants();
        keep_running
    }

    pub fn connect(&mut self) -> TestClient {
        let key = ConnectionKey(self.next_key);
        self.next_key += 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.step(CoordinatorEvent::ConnectionOpened { key, tx });
        TestClient {
            key,
            rx,
            closed: false,
        }
    }

    pub fn disconnect(&mut self, client: &TestClient) {
        self.step(CoordinatorEvent::ConnectionClosed { key: client.key });
    }

    pub fn send_raw(&mut self, client: &TestClient, text: &str) {
        self.step(CoordinatorEvent::Request {
            key: client.key,
            text: text.to_string(),
        });
    }

    pub fn request(&mut self, client: &TestClient, request: &Request, player_id: &str) {
        let mut value = serde_json::to_value(request).expect("serializable request");
        value
            .as_object_mut()
            .expect("request frame is an object")
            .insert(
                "authorization".to_string(),
                json!(format!("Player {}", player_id)),
            );
        self.send_raw(client, &value.to_string());
    }

    /// Send a request frame with no authorization attached.
    pub fn request_unauthenticated(&mut self, client: &TestClient, request: &Request) {
        let value = serde_json::to_value(request).expect("serializable request");
        self.send_raw(client, &value.to_string());
    }

    pub fn sweep(&mut self, kind: SweepKind) {
        self.step(CoordinatorEvent::Sweep {
            kind,
            in_flight: None,
        });
    }

    pub fn advance(&mut self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    pub fn shutdown(&mut self) -> bool {
        self.step(CoordinatorEvent::Shutdown)
    }

    /// Drain everything queued for a client, decoding frames as events.
    pub fn events(&mut self, client: &mut TestClient) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(outbound) = client.rx.try_recv() {
            match outbound {
                Outbound::Frame(text) => {
                    let event: Event =
                        serde_json::from_str(&text).expect("decodable outbound frame");
                    events.push(event);
                }
                Outbound::Close => client.closed = true,
            }
        }
        events
    }

    /// Register a player and return its issued player id.
    pub fn register(&mut self, client: &mut TestClient, handle: &str) -> String {
        self.send_raw(
            client,
            &json!({"message": "REGISTER_PLAYER", "context": {"handle": handle}}).to_string(),
        );
        let events = self.events(client);
        for event in events {
            if let Event::PlayerRegistered(context) = event {
                return context.player_id;
            }
        }
        panic!("expected PLAYER_REGISTERED for {}", handle);
    }
}

/// The game id carried by the first GAME_JOINED in a batch of events.
pub fn joined_game_id(events: &[Event]) -> Option<String> {
    events.iter().find_map(|event| match event {
        Event::GameJoined(context) => Some(context.game_id.clone()),
        _ => None,
    })
}

/// The first GAME_PLAYER_TURN in a batch, if any.
pub fn first_turn(events: &[Event]) -> Option<&apologies_protocol::GamePlayerTurnContext> {
    events.iter().find_map(|event| match event {
        Event::GamePlayerTurn(context) => Some(context),
        _ => None,
    })
}

pub fn has_event(events: &[Event], predicate: impl Fn(&Event) -> bool) -> bool {
    events.iter().any(predicate)
}
