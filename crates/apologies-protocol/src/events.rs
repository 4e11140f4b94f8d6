//! Server -> client event messages.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use apologies_engine::{GameMode, Move, PlayerColor, PlayerView};

use crate::states::{
    ActivityState, CompletionReason, ConnectionState, FailureReason, PlayState, PlayerKind,
    SeatState, Visibility,
};

/// An event published to a client, tagged by the `message` field with
/// the payload under `context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", content = "context")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    RequestFailed(RequestFailedContext),
    PlayerRegistered(PlayerRegisteredContext),
    RegisteredPlayers(RegisteredPlayersContext),
    AvailableGames(AvailableGamesContext),
    PlayerIdle,
    PlayerInactive,
    PlayerMessageReceived(PlayerMessageReceivedContext),
    GameAdvertised(GameAdvertisedContext),
    GameInvitation(GameInvitationContext),
    GameJoined(GameJoinedContext),
    GameStarted,
    GameCancelled(GameCancelledContext),
    GameCompleted(GameCompletedContext),
    GameIdle,
    GamePlayerChange(GamePlayerChangeContext),
    GameStateChange(GameStateChangeContext),
    GamePlayerTurn(GamePlayerTurnContext),
    WebsocketIdle,
    WebsocketInactive,
    ServerShutdown,
}

/// Context for REQUEST_FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFailedContext {
    pub reason: FailureReason,
    pub comment: String,
}

impl RequestFailedContext {
    pub fn new(reason: FailureReason, comment: Option<String>) -> Self {
        RequestFailedContext {
            comment: comment.unwrap_or_else(|| reason.default_comment().to_string()),
            reason,
        }
    }
}

/// Context for PLAYER_REGISTERED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRegisteredContext {
    pub player_id: String,
}

/// One entry in a REGISTERED_PLAYERS listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredPlayer {
    pub handle: String,
    pub registration_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub activity_state: ActivityState,
    pub play_state: PlayState,
    pub game_id: Option<String>,
}

/// Context for REGISTERED_PLAYERS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredPlayersContext {
    pub players: Vec<RegisteredPlayer>,
}

/// One entry in an AVAILABLE_GAMES listing; also the payload of
/// GAME_ADVERTISED and GAME_INVITATION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisedGame {
    pub game_id: String,
    pub name: String,
    pub mode: GameMode,
    pub advertiser_handle: String,
    pub players: usize,
    pub available: usize,
    pub visibility: Visibility,
    pub invited_handles: Vec<String>,
}

/// Context for AVAILABLE_GAMES.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableGamesContext {
    pub games: Vec<AdvertisedGame>,
}

/// Context for PLAYER_MESSAGE_RECEIVED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMessageReceivedContext {
    pub sender_handle: String,
    pub recipient_handles: Vec<String>,
    pub message: String,
}

/// Context for GAME_ADVERTISED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAdvertisedContext {
    pub game: AdvertisedGame,
}

/// Context for GAME_INVITATION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInvitationContext {
    pub game: AdvertisedGame,
}

/// Context for GAME_JOINED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameJoinedContext {
    pub game_id: String,
}

/// Context for GAME_CANCELLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCancelledContext {
    pub reason: CompletionReason,
    pub comment: Option<String>,
}

/// Context for GAME_COMPLETED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCompletedContext {
    pub winner_handle: Option<String>,
    pub comment: Option<String>,
}

/// One seat in a GAME_PLAYER_CHANGE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayer {
    pub handle: Option<String>,
    #[serde(rename = "type")]
    pub kind: PlayerKind,
    pub state: SeatState,
}

/// Context for GAME_PLAYER_CHANGE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayerChangeContext {
    pub comment: Option<String>,
    pub players: IndexMap<PlayerColor, GamePlayer>,
}

/// Context for GAME_STATE_CHANGE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateChangeContext {
    pub game_id: String,
    pub view: PlayerView,
}

/// Context for GAME_PLAYER_TURN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayerTurnContext {
    pub handle: String,
    pub color: PlayerColor,
    pub moves: Vec<Move>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contextless_event_omits_context() {
        let encoded = serde_json::to_string(&Event::ServerShutdown).unwrap();
        assert_eq!(encoded, r#"{"message":"SERVER_SHUTDOWN"}"#);
    }

    #[test]
    fn request_failed_uses_default_comment() {
        let context = RequestFailedContext::new(FailureReason::HandleTaken, None);
        assert_eq!(context.comment, "Handle is already in use");
        let context =
            RequestFailedContext::new(FailureReason::HandleTaken, Some("taken".to_string()));
        assert_eq!(context.comment, "taken");
    }

    #[test]
    fn timestamps_carry_utc_offset() {
        let player = RegisteredPlayer {
            handle: "leela".to_string(),
            registration_date: "2024-05-01T12:00:00Z".parse().unwrap(),
            last_active_date: "2024-05-01T12:30:00Z".parse().unwrap(),
            connection_state: ConnectionState::Connected,
            activity_state: ActivityState::Active,
            play_state: PlayState::Waiting,
            game_id: None,
        };
        let encoded = serde_json::to_string(&player).unwrap();
        assert!(encoded.contains("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn player_change_keys_are_colors() {
        let mut players = IndexMap::new();
        players.insert(
            PlayerColor::Red,
            GamePlayer {
                handle: Some("leela".to_string()),
                kind: PlayerKind::Human,
                state: SeatState::Playing,
            },
        );
        let encoded = serde_json::to_string(&Event::GamePlayerChange(GamePlayerChangeContext {
            comment: None,
            players,
        }))
        .unwrap();
        assert!(encoded.contains(r#""RED":{"#));
        assert!(encoded.contains(r#""type":"HUMAN""#));
    }
}
