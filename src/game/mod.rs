//! Game Logic Module
//!
//! Pure, synchronous session logic. No I/O, no clocks, no async.
//!
//! ## Module Structure
//!
//! - `board`: Board cells, marks, win/tie evaluation
//! - `input`: Participant seats and the actions they send
//! - `state`: Session state machine
//! - `events`: Addressed events produced by transitions

pub mod board;
pub mod input;
pub mod state;
pub mod events;

// Re-export key types
pub use board::{Board, Mark, Outcome};
pub use input::{Action, ParticipantIndex};
pub use state::{ConnectionId, Phase, Session, SessionId};
pub use events::{GameEvent, GameEventData, Recipient};
