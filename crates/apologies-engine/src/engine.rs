//! Engine state and move application.
//!
//! The rules are a simplified race: each seat owns four pawns that
//! travel a fixed-length track. On a turn the seat draws the next card
//! from the rotation and advances one pawn by the card value (capped at
//! home). The first seat with all four pawns home wins. A seat that
//! forfeits is skipped by turn rotation; if only one seat remains, it
//! wins by default.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::card::Card;
use crate::color::{GameMode, PlayerColor};
use crate::error::EngineError;
use crate::view::PlayerView;

/// Pawns per seat.
pub const PAWNS_PER_SEAT: usize = 4;

/// A legal move offered to the current turn-holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// Opaque move identifier, passed back in EXECUTE_MOVE.
    pub move_id: String,

    /// Human-readable description of the move.
    pub description: String,
}

/// Result of applying a move or a forfeit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The game continues; `next_seat` holds the new turn.
    Continue { next_seat: PlayerColor },

    /// The game is over.
    GameOver { winner: PlayerColor },
}

/// Complete game state, stored as a value on the server's game record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    mode: GameMode,
    seats: Vec<PlayerColor>,
    pawns: IndexMap<PlayerColor, [u8; PAWNS_PER_SEAT]>,
    forfeited: Vec<PlayerColor>,
    current: PlayerColor,
    deck_pos: usize,
    winner: Option<PlayerColor>,
}

impl EngineState {
    /// Seat currently on turn.
    pub fn current_seat(&self) -> PlayerColor {
        self.current
    }

    /// Winner, once the game is over.
    pub fn winner(&self) -> Option<PlayerColor> {
        self.winner
    }

    /// Whether the given seat has forfeited.
    pub fn is_forfeited(&self, seat: PlayerColor) -> bool {
        self.forfeited.contains(&seat)
    }

    /// Card the current turn will draw.
    pub fn pending_card(&self) -> Card {
        Card::at(self.deck_pos)
    }

    fn next_unforfeited_after(&self, seat: PlayerColor) -> PlayerColor {
        let start = self
            .seats
            .iter()
            .position(|s| *s == seat)
            .unwrap_or(0);
        for offset in 1..=self.seats.len() {
            let candidate = self.seats[(start + offset) % self.seats.len()];
            if !self.forfeited.contains(&candidate) {
                return candidate;
            }
        }
        seat
    }

    fn active_seats(&self) -> Vec<PlayerColor> {
        self.seats
            .iter()
            .copied()
            .filter(|s| !self.forfeited.contains(s))
            .collect()
    }
}

/// Stateless engine operations over [`EngineState`] values.
pub struct Engine;

impl Engine {
    /// Start a game for the given seats. The first seat takes the first
    /// turn.
    ///
    /// Panics if `seats` is empty; the server guarantees 2-4 seats.
    pub fn start(mode: GameMode, seats: &[PlayerColor]) -> EngineState {
        assert!(!seats.is_empty(), "a game requires at least one seat");
        let pawns = seats.iter().map(|s| (*s, [0; PAWNS_PER_SEAT])).collect();
        EngineState {
            mode,
            seats: seats.to_vec(),
            pawns,
            forfeited: Vec::new(),
            current: seats[0],
            deck_pos: 0,
            winner: None,
        }
    }

    /// Legal moves for a seat. Empty unless the seat holds the current
    /// turn and the game is still running; on turn there is always at
    /// least one move (a pass when no pawn can advance).
    pub fn legal_moves(state: &EngineState, seat: PlayerColor) -> Vec<Move> {
        if state.winner.is_some() || state.current != seat || state.is_forfeited(seat) {
            return Vec::new();
        }
        let card = state.pending_card();
        let track = state.mode.track_len();
        let mut moves = Vec::new();
        if let Some(positions) = state.pawns.get(&seat) {
            for (idx, pos) in positions.iter().enumerate() {
                if *pos < track {
                    moves.push(Move {
                        move_id: format!("m-{}-p{}", seat.as_str(), idx),
                        description: format!(
                            "Move pawn {} forward {} squares",
                            idx + 1,
                            card.steps()
                        ),
                    });
                }
            }
        }
        if moves.is_empty() {
            moves.push(Move {
                move_id: format!("m-{}-pass", seat.as_str()),
                description: "Pass".to_string(),
            });
        }
        moves
    }

    /// Deterministic move policy for programmatic seats: advance the
    /// pawn closest to home.
    pub fn choose_move(state: &EngineState, seat: PlayerColor) -> Option<Move> {
        let moves = Self::legal_moves(state, seat);
        let positions = state.pawns.get(&seat)?;
        moves
            .into_iter()
            .max_by_key(|m| pawn_index(&m.move_id).map(|idx| positions[idx]).unwrap_or(0))
    }

    /// Apply a move for a seat, returning the new state and outcome.
    pub fn apply(
        state: &EngineState,
        seat: PlayerColor,
        move_id: &str,
    ) -> Result<(EngineState, Outcome), EngineError> {
        if state.winner.is_some() {
            return Err(EngineError::GameOver);
        }
        if state.current != seat || state.is_forfeited(seat) {
            return Err(EngineError::NotYourTurn);
        }
        let legal = Self::legal_moves(state, seat);
        let chosen = legal
            .iter()
            .find(|m| m.move_id == move_id)
            .ok_or_else(|| EngineError::IllegalMove(move_id.to_string()))?;

        let mut next = state.clone();
        if let Some(idx) = pawn_index(&chosen.move_id) {
            let steps = next.pending_card().steps();
            let track = next.mode.track_len();
            if let Some(positions) = next.pawns.get_mut(&seat) {
                positions[idx] = positions[idx].saturating_add(steps).min(track);
                if positions.iter().all(|p| *p == track) {
                    next.winner = Some(seat);
                    return Ok((next, Outcome::GameOver { winner: seat }));
                }
            }
        }
        next.deck_pos += 1;
        next.current = next.next_unforfeited_after(seat);
        let next_seat = next.current;
        Ok((next, Outcome::Continue { next_seat }))
    }

    /// Remove a seat from turn rotation. If only one seat remains, it
    /// wins by default.
    pub fn forfeit(state: &EngineState, seat: PlayerColor) -> (EngineState, Outcome) {
        let mut next = state.clone();
        if !next.forfeited.contains(&seat) {
            next.forfeited.push(seat);
        }
        let remaining = next.active_seats();
        if remaining.len() == 1 {
            let winner = remaining[0];
            next.winner = Some(winner);
            return (next, Outcome::GameOver { winner });
        }
        if next.current == seat {
            next.current = next.next_unforfeited_after(seat);
        }
        let next_seat = next.current;
        (next, Outcome::Continue { next_seat })
    }

    /// Per-seat view sent to clients in GAME_STATE_CHANGE.
    pub fn player_view(state: &EngineState, seat: PlayerColor) -> PlayerView {
        PlayerView {
            color: seat,
            mode: state.mode,
            track_len: state.mode.track_len(),
            current_turn: state.current,
            pending_card: state.pending_card(),
            pawns: state.pawns.clone(),
            forfeited: state.forfeited.clone(),
            winner: state.winner,
        }
    }
}

fn pawn_index(move_id: &str) -> Option<usize> {
    let (_, suffix) = move_id.rsplit_once("-p")?;
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_seat_state() -> EngineState {
        Engine::start(GameMode::Adult, &[PlayerColor::Red, PlayerColor::Yellow])
    }

    #[test]
    fn start_gives_first_seat_the_turn() {
        let state = two_seat_state();
        assert_eq!(state.current_seat(), PlayerColor::Red);
        assert!(state.winner().is_none());
    }

    #[test]
    fn legal_moves_only_for_turn_holder() {
        let state = two_seat_state();
        assert_eq!(
            Engine::legal_moves(&state, PlayerColor::Red).len(),
            PAWNS_PER_SEAT
        );
        assert!(Engine::legal_moves(&state, PlayerColor::Yellow).is_empty());
    }

    #[test]
    fn apply_advances_pawn_and_rotates_turn() {
        let state = two_seat_state();
        let steps = state.pending_card().steps();
        let (next, outcome) = Engine::apply(&state, PlayerColor::Red, "m-red-p0").unwrap();
        assert_eq!(
            outcome,
            Outcome::Continue {
                next_seat: PlayerColor::Yellow
            }
        );
        assert_eq!(next.pawns[&PlayerColor::Red][0], steps);
        assert_eq!(next.current_seat(), PlayerColor::Yellow);
    }

    #[test]
    fn apply_is_deterministic() {
        let state = two_seat_state();
        let a = Engine::apply(&state, PlayerColor::Red, "m-red-p1").unwrap();
        let b = Engine::apply(&state, PlayerColor::Red, "m-red-p1").unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn wrong_seat_is_rejected() {
        let state = two_seat_state();
        assert_eq!(
            Engine::apply(&state, PlayerColor::Yellow, "m-yellow-p0"),
            Err(EngineError::NotYourTurn)
        );
    }

    #[test]
    fn unknown_move_is_rejected() {
        let state = two_seat_state();
        assert!(matches!(
            Engine::apply(&state, PlayerColor::Red, "m-red-p9"),
            Err(EngineError::IllegalMove(_))
        ));
    }

    #[test]
    fn forfeit_skips_seat_in_rotation() {
        let state = Engine::start(
            GameMode::Adult,
            &[PlayerColor::Red, PlayerColor::Yellow, PlayerColor::Green],
        );
        let (state, outcome) = Engine::forfeit(&state, PlayerColor::Yellow);
        assert_eq!(
            outcome,
            Outcome::Continue {
                next_seat: PlayerColor::Red
            }
        );
        let (next, outcome) = Engine::apply(&state, PlayerColor::Red, "m-red-p0").unwrap();
        assert_eq!(
            outcome,
            Outcome::Continue {
                next_seat: PlayerColor::Green
            }
        );
        assert_eq!(next.current_seat(), PlayerColor::Green);
    }

    #[test]
    fn last_seat_standing_wins() {
        let state = two_seat_state();
        let (next, outcome) = Engine::forfeit(&state, PlayerColor::Yellow);
        assert_eq!(
            outcome,
            Outcome::GameOver {
                winner: PlayerColor::Red
            }
        );
        assert_eq!(next.winner(), Some(PlayerColor::Red));
    }

    #[test]
    fn game_terminates_with_programmatic_play() {
        let mut state = Engine::start(GameMode::Adult, &[PlayerColor::Red, PlayerColor::Yellow]);
        let mut turns = 0;
        loop {
            let seat = state.current_seat();
            let chosen = Engine::choose_move(&state, seat).expect("turn-holder has a move");
            match Engine::apply(&state, seat, &chosen.move_id).unwrap() {
                (next, Outcome::Continue { .. }) => state = next,
                (_, Outcome::GameOver { .. }) => break,
            }
            turns += 1;
            assert!(turns < 1000, "game should terminate");
        }
    }

    #[test]
    fn choose_move_prefers_pawn_closest_to_home() {
        let state = two_seat_state();
        let (state, _) = Engine::apply(&state, PlayerColor::Red, "m-red-p2").unwrap();
        let (state, _) =
            Engine::apply(&state, PlayerColor::Yellow, "m-yellow-p0").unwrap();
        let chosen = Engine::choose_move(&state, PlayerColor::Red).unwrap();
        assert_eq!(chosen.move_id, "m-red-p2");
    }

    #[test]
    fn views_share_public_state() {
        let state = two_seat_state();
        let red = Engine::player_view(&state, PlayerColor::Red);
        let yellow = Engine::player_view(&state, PlayerColor::Yellow);
        assert_eq!(red.pawns, yellow.pawns);
        assert_eq!(red.color, PlayerColor::Red);
        assert_eq!(yellow.color, PlayerColor::Yellow);
    }

    #[test]
    fn game_over_rejects_further_moves() {
        let state = two_seat_state();
        let (state, _) = Engine::forfeit(&state, PlayerColor::Yellow);
        assert_eq!(
            Engine::apply(&state, PlayerColor::Red, "m-red-p0"),
            Err(EngineError::GameOver)
        );
    }
}
