//! Per-seat game views.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::card::Card;
use crate::color::{GameMode, PlayerColor};
use crate::engine::PAWNS_PER_SEAT;

/// The state of a game as seen by one seat.
///
/// Pawn positions are public information in this ruleset, so views for
/// different seats differ only in the `color` tag; the server still
/// sends each player its own view so the shape stays stable if hidden
/// information (hands, etc.) is added later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Seat this view was produced for.
    pub color: PlayerColor,
    pub mode: GameMode,
    pub track_len: u8,
    pub current_turn: PlayerColor,
    pub pending_card: Card,
    pub pawns: IndexMap<PlayerColor, [u8; PAWNS_PER_SEAT]>,
    pub forfeited: Vec<PlayerColor>,
    pub winner: Option<PlayerColor>,
}
