//! Error types for the game engine.

/// Errors returned when applying a move to an engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The acting seat is not the current turn-holder.
    NotYourTurn,

    /// The move id does not name a legal move for the acting seat.
    IllegalMove(String),

    /// The game is already over; no further moves are accepted.
    GameOver,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotYourTurn => write!(f, "it is not that seat's turn"),
            EngineError::IllegalMove(id) => write!(f, "move {} is not legal", id),
            EngineError::GameOver => write!(f, "the game is already over"),
        }
    }
}

impl std::error::Error for EngineError {}
