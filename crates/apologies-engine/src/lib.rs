//! apologies-engine
//!
//! Pure game logic for an Apologies (Sorry!-like) race game:
//! - seat colors and game modes
//! - the card deck
//! - engine state as a plain value
//! - legal-move generation and move application
//! - per-seat views for clients
//!
//! The engine has no hidden state: every call is `state -> state'` plus
//! an outcome. Networking, scheduling, and player bookkeeping live in
//! the `apologies-server` crate.

pub mod card;
pub mod color;
pub mod engine;
pub mod error;
pub mod view;

pub use card::Card;
pub use color::{GameMode, PlayerColor};
pub use engine::{Engine, EngineState, Move, Outcome, PAWNS_PER_SEAT};
pub use error::EngineError;
pub use view::PlayerView;
