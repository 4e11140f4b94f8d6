//! State enums shared between the server and its clients.

use serde::{Deserialize, Serialize};

/// Visibility for advertised games.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    Private,
}

/// A player's connection state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Activity state for players, games, and connections.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    Active,
    Idle,
    Inactive,
}

/// A player's play state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayState {
    Waiting,
    Joined,
    Playing,
    Finished,
}

/// Lifecycle state of a game.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Advertised,
    Started,
    Completed,
    Cancelled,
}

impl GameState {
    /// ADVERTISED and STARTED games count against the in-progress limit.
    pub fn is_in_progress(self) -> bool {
        matches!(self, GameState::Advertised | GameState::Started)
    }

    /// COMPLETED and CANCELLED games are retained until the obsolete
    /// sweep removes them.
    pub fn is_finished(self) -> bool {
        matches!(self, GameState::Completed | GameState::Cancelled)
    }
}

/// State of one seat within a game.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Joined,
    Playing,
    Quit,
    Disconnected,
    Finished,
}

/// Kind of player occupying a seat.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerKind {
    Human,
    Programmatic,
}

/// Why a game reached a terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionReason {
    Won,
    Cancelled,
    NotViable,
    Inactive,
    Shutdown,
}

/// Failure reasons advertised to clients in REQUEST_FAILED.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    InvalidRequest,
    HandleTaken,
    UserLimit,
    WebsocketLimit,
    TotalGameLimit,
    InProgressGameLimit,
    AlreadyPlaying,
    InvalidPlayer,
    InvalidGame,
    GameAlreadyStarted,
    NotInvited,
    NoSeats,
    NotAdvertiser,
    NotYourTurn,
    IllegalMove,
    InvalidGameState,
    MessageTooLarge,
    NotAuthorized,
}

impl FailureReason {
    /// Default human-readable comment for the reason.
    pub fn default_comment(self) -> &'static str {
        match self {
            FailureReason::InvalidRequest => "Request was malformed",
            FailureReason::HandleTaken => "Handle is already in use",
            FailureReason::UserLimit => "Registered player limit reached",
            FailureReason::WebsocketLimit => "Connection limit reached",
            FailureReason::TotalGameLimit => "Total game limit reached",
            FailureReason::InProgressGameLimit => "In-progress game limit reached",
            FailureReason::AlreadyPlaying => "Player is already in a game",
            FailureReason::InvalidPlayer => "Unknown player",
            FailureReason::InvalidGame => "Unknown game",
            FailureReason::GameAlreadyStarted => "Game has already started",
            FailureReason::NotInvited => "Player is not invited to this game",
            FailureReason::NoSeats => "No seats remain in this game",
            FailureReason::NotAdvertiser => "Only the advertiser may do that",
            FailureReason::NotYourTurn => "It is not your turn",
            FailureReason::IllegalMove => "Move is not legal",
            FailureReason::InvalidGameState => "Game is not in a state that allows that",
            FailureReason::MessageTooLarge => "Message is too large",
            FailureReason::NotAuthorized => "Missing or invalid authorization",
        }
    }
}
