//! Game Events
//!
//! Events produced by session transitions, addressed to one or both seats.
//! The network layer turns them into `ServerMessage`s and delivers them
//! in the order they were produced.

use serde::{Serialize, Deserialize};

use crate::game::board::Mark;
use crate::game::input::ParticipantIndex;

/// Who receives an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// A single seat.
    Participant(ParticipantIndex),
    /// Every seated participant.
    All,
}

impl Recipient {
    /// Does this recipient include `index`?
    pub fn includes(self, index: ParticipantIndex) -> bool {
        match self {
            Recipient::Participant(target) => target == index,
            Recipient::All => true,
        }
    }
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Seat assigned to a joining connection.
    RoleAssigned {
        player: ParticipantIndex,
        mark: Mark,
    },

    /// Second participant joined; play begins.
    Started {
        turn: ParticipantIndex,
        your_turn: bool,
    },

    /// A mark was placed.
    MovePlayed {
        index: usize,
        player: ParticipantIndex,
        mark: Mark,
    },

    /// Turn passed to another seat.
    TurnChanged {
        turn: ParticipantIndex,
    },

    /// A participant completed a line.
    Won {
        player: ParticipantIndex,
    },

    /// Board filled with no line.
    Tied,

    /// Opponent asked for a rematch.
    RematchOffered,

    /// Board cleared for a new game.
    Reset,

    /// The other participant disconnected.
    OpponentLeft,
}

/// An addressed game event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Who receives it.
    pub recipient: Recipient,
    /// What happened.
    pub data: GameEventData,
}

impl GameEvent {
    /// Event for one seat.
    pub fn to(index: ParticipantIndex, data: GameEventData) -> Self {
        Self {
            recipient: Recipient::Participant(index),
            data,
        }
    }

    /// Event for both seats.
    pub fn broadcast(data: GameEventData) -> Self {
        Self {
            recipient: Recipient::All,
            data,
        }
    }
}
