//! apologies-protocol
//!
//! Wire-level message types for the Apologies game server.
//!
//! Every frame on the wire is one JSON object of the shape
//! `{"message": <KIND>, "context": {...}}`. Client frames other than
//! REGISTER_PLAYER also carry `"authorization": "Player <player-id>"`.
//!
//! - [`requests`] : client -> server messages
//! - [`events`]   : server -> client messages
//! - [`states`]   : shared state enums that appear in payloads
//! - [`frame`]    : JSON encode/decode and authorization parsing

pub mod events;
pub mod frame;
pub mod requests;
pub mod states;

pub use events::{
    AdvertisedGame, Event, GameCancelledContext, GameCompletedContext, GamePlayer,
    GamePlayerChangeContext, GamePlayerTurnContext, GameStateChangeContext, RegisteredPlayer,
};
pub use frame::{decode_request, encode_event, mask_player_ids, parse_authorization, ProtocolError};
pub use requests::Request;
pub use states::{
    ActivityState, CompletionReason, ConnectionState, FailureReason, GameState, PlayState,
    PlayerKind, SeatState, Visibility,
};
