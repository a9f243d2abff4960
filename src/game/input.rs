//! Participant Actions
//!
//! The actions a seated participant can take, independent of wire format.
//! The network layer converts `ClientMessage` into `Action` before
//! handing it to the session.

use serde::{Serialize, Deserialize};

use crate::game::board::Mark;

// =============================================================================
// PARTICIPANT INDEX
// =============================================================================

/// Seat of a participant: 0 or 1.
///
/// Fixes mark assignment (0 = X, 1 = O) and turn order (0 moves first).
/// Serialized as a bare number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ParticipantIndex(u8);

impl ParticipantIndex {
    /// First seat (X, moves first).
    pub const FIRST: Self = Self(0);
    /// Second seat (O).
    pub const SECOND: Self = Self(1);
    /// Both seats in order.
    pub const ALL: [Self; 2] = [Self::FIRST, Self::SECOND];

    /// Create from a raw index; `None` unless 0 or 1.
    pub const fn new(index: u8) -> Option<Self> {
        match index {
            0 | 1 => Some(Self(index)),
            _ => None,
        }
    }

    /// Raw index.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Index as a slot position.
    pub const fn slot(self) -> usize {
        self.0 as usize
    }

    /// The other seat.
    pub const fn other(self) -> Self {
        Self(1 - self.0)
    }

    /// Mark assigned to this seat.
    pub const fn mark(self) -> Mark {
        match self.0 {
            0 => Mark::X,
            _ => Mark::O,
        }
    }
}

impl TryFrom<u8> for ParticipantIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("participant index {} out of range", value))
    }
}

impl From<ParticipantIndex> for u8 {
    fn from(index: ParticipantIndex) -> Self {
        index.0
    }
}

impl std::fmt::Display for ParticipantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// An action requested by a seated participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Place the participant's mark at a cell.
    ///
    /// The index is carried unvalidated; the session ignores anything
    /// outside `[0, 9)`.
    Move {
        /// Target cell, row-major.
        index: i64,
    },
    /// Ask the opponent for a rematch.
    Rematch,
    /// Accept a rematch and reset the board.
    RematchAccepted,
}
