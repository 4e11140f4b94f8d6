//! Seat colors and game modes.

use serde::{Deserialize, Serialize};

/// Color of a seat in a game.
///
/// Seats are always assigned in this order, so a two-seat game uses
/// Red and Yellow, a three-seat game adds Green, and so on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerColor {
    Red,
    Yellow,
    Green,
    Blue,
}

impl PlayerColor {
    /// All colors, in seat-assignment order.
    pub const ALL: [PlayerColor; 4] = [
        PlayerColor::Red,
        PlayerColor::Yellow,
        PlayerColor::Green,
        PlayerColor::Blue,
    ];

    /// Lowercase name, used in move identifiers.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerColor::Red => "red",
            PlayerColor::Yellow => "yellow",
            PlayerColor::Green => "green",
            PlayerColor::Blue => "blue",
        }
    }
}

impl std::fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game mode.
///
/// Adult mode plays on a shorter track, so games finish faster.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Standard,
    Adult,
}

impl GameMode {
    /// Number of squares a pawn must travel to reach home.
    pub fn track_len(self) -> u8 {
        match self {
            GameMode::Standard => 60,
            GameMode::Adult => 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_order_is_stable() {
        assert_eq!(PlayerColor::ALL[0], PlayerColor::Red);
        assert_eq!(PlayerColor::ALL[3], PlayerColor::Blue);
    }

    #[test]
    fn adult_track_is_shorter() {
        assert!(GameMode::Adult.track_len() < GameMode::Standard.track_len());
    }
}
