//! Client -> server request messages.
//!
//! Requests deserialize from untrusted input, so every context is
//! validated before a handler sees it. Validation errors surface as
//! REQUEST_FAILED with reason INVALID_REQUEST.

use serde::{Deserialize, Serialize};

use apologies_engine::GameMode;

use crate::states::Visibility;

/// A request received from a client, tagged by the `message` field with
/// the payload under `context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", content = "context")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    RegisterPlayer(RegisterPlayerContext),
    ReregisterPlayer,
    UnregisterPlayer,
    ListPlayers,
    AdvertiseGame(AdvertiseGameContext),
    ListAvailableGames,
    JoinGame(JoinGameContext),
    QuitGame,
    StartGame,
    CancelGame,
    ExecuteMove(ExecuteMoveContext),
    RetrieveGameState,
    SendMessage(SendMessageContext),
}

/// Context for REGISTER_PLAYER.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPlayerContext {
    pub handle: String,
}

/// Context for ADVERTISE_GAME.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertiseGameContext {
    pub name: String,
    pub mode: GameMode,
    pub players: usize,
    pub visibility: Visibility,
    pub invited_handles: Vec<String>,
}

/// Context for JOIN_GAME.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinGameContext {
    pub game_id: String,
}

/// Context for EXECUTE_MOVE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteMoveContext {
    pub move_id: String,
}

/// Context for SEND_MESSAGE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageContext {
    pub message: String,
    pub recipient_handles: Vec<String>,
}

impl Request {
    /// Short wire name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::RegisterPlayer(_) => "REGISTER_PLAYER",
            Request::ReregisterPlayer => "REREGISTER_PLAYER",
            Request::UnregisterPlayer => "UNREGISTER_PLAYER",
            Request::ListPlayers => "LIST_PLAYERS",
            Request::AdvertiseGame(_) => "ADVERTISE_GAME",
            Request::ListAvailableGames => "LIST_AVAILABLE_GAMES",
            Request::JoinGame(_) => "JOIN_GAME",
            Request::QuitGame => "QUIT_GAME",
            Request::StartGame => "START_GAME",
            Request::CancelGame => "CANCEL_GAME",
            Request::ExecuteMove(_) => "EXECUTE_MOVE",
            Request::RetrieveGameState => "RETRIEVE_GAME_STATE",
            Request::SendMessage(_) => "SEND_MESSAGE",
        }
    }

    /// Validate untrusted field values, returning a description of the
    /// first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::RegisterPlayer(ctx) => {
                nonempty("handle", &ctx.handle)?;
            }
            Request::AdvertiseGame(ctx) => {
                nonempty("name", &ctx.name)?;
                if !(2..=4).contains(&ctx.players) {
                    return Err("'players' must be 2, 3, or 4".to_string());
                }
                for handle in &ctx.invited_handles {
                    nonempty("invited_handles", handle)?;
                }
            }
            Request::JoinGame(ctx) => {
                nonempty("game_id", &ctx.game_id)?;
            }
            Request::ExecuteMove(ctx) => {
                nonempty("move_id", &ctx.move_id)?;
            }
            Request::SendMessage(ctx) => {
                nonempty("message", &ctx.message)?;
                if ctx.recipient_handles.is_empty() {
                    return Err("'recipient_handles' may not be empty".to_string());
                }
                for handle in &ctx.recipient_handles {
                    nonempty("recipient_handles", handle)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn nonempty(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err(format!("'{}' must be a non-empty string", field))
    } else {
        Ok(())
    }
}
