//! The card deck.
//!
//! Cards are drawn from a fixed rotation rather than a shuffled deck:
//! the engine state records the deck position, and the same position
//! always yields the same card. This keeps the engine a pure function
//! of its inputs, which the server relies on for replay and testing.

use serde::{Deserialize, Serialize};

/// A card drawn on a turn. The card value is the number of squares a
/// pawn advances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Card {
    One,
    Two,
    Three,
    Four,
    Five,
    Seven,
    Eight,
    Ten,
    Eleven,
    Twelve,
}

/// Draw rotation. Position `n` in an engine state draws `DECK[n % DECK.len()]`.
pub const DECK: [Card; 10] = [
    Card::Five,
    Card::One,
    Card::Ten,
    Card::Three,
    Card::Eight,
    Card::Two,
    Card::Twelve,
    Card::Four,
    Card::Eleven,
    Card::Seven,
];

impl Card {
    /// Number of squares this card moves a pawn.
    pub fn steps(self) -> u8 {
        match self {
            Card::One => 1,
            Card::Two => 2,
            Card::Three => 3,
            Card::Four => 4,
            Card::Five => 5,
            Card::Seven => 7,
            Card::Eight => 8,
            Card::Ten => 10,
            Card::Eleven => 11,
            Card::Twelve => 12,
        }
    }

    /// Card drawn at a given deck position.
    pub fn at(deck_pos: usize) -> Card {
        DECK[deck_pos % DECK.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wraps() {
        assert_eq!(Card::at(0), Card::at(DECK.len()));
        assert_eq!(Card::at(3), Card::Three);
    }

    #[test]
    fn every_card_moves() {
        for card in DECK {
            assert!(card.steps() > 0);
        }
    }
}
