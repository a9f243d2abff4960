//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON object tagged by `type`.
//!
//! Protocol version 1 always carries participants as their seat index
//! (`0` or `1`); `mark` is sent alongside for display only.

use serde::{Serialize, Deserialize};

use crate::game::board::Mark;
use crate::game::events::GameEventData;
use crate::game::input::{Action, ParticipantIndex};
use crate::game::state::SessionId;

/// Protocol version implemented by this server.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Place a mark.
    Move {
        /// Target cell (0-8, row-major).
        index: i64,
    },

    /// Ask the opponent for a rematch.
    Rematch,

    /// Accept a rematch offer.
    RematchAccepted,
}

impl ClientMessage {
    /// Convert to the game-level action.
    pub fn to_action(&self) -> Action {
        match *self {
            ClientMessage::Move { index } => Action::Move { index },
            ClientMessage::Rematch => Action::Rematch,
            ClientMessage::RematchAccepted => Action::RematchAccepted,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Id of a freshly created session, sent before `role`.
    Session {
        /// Session to share with the opponent.
        #[serde(rename = "gameId")]
        game_id: SessionId,
    },

    /// Seat assigned to this connection.
    Role {
        /// Seat index.
        player: ParticipantIndex,
        /// Mark for that seat.
        mark: Mark,
    },

    /// Both seats filled; play begins.
    Start {
        /// Seat that moves first.
        turn: ParticipantIndex,
        /// Whether the recipient moves first.
        #[serde(rename = "yourTurn")]
        your_turn: bool,
    },

    /// A mark was placed.
    Move {
        /// Cell index.
        index: usize,
        /// Seat that moved.
        player: ParticipantIndex,
        /// Mark placed.
        mark: Mark,
    },

    /// Turn passed.
    Turn {
        /// Seat that moves next.
        turn: ParticipantIndex,
    },

    /// Game won.
    Win {
        /// Winning seat.
        player: ParticipantIndex,
    },

    /// Game tied.
    Tie,

    /// Opponent wants a rematch.
    RematchOffer,

    /// Board cleared.
    Reset,

    /// Opponent disconnected.
    OpponentLeft,
}

impl From<&GameEventData> for ServerMessage {
    fn from(data: &GameEventData) -> Self {
        match *data {
            GameEventData::RoleAssigned { player, mark } => ServerMessage::Role { player, mark },
            GameEventData::Started { turn, your_turn } => ServerMessage::Start { turn, your_turn },
            GameEventData::MovePlayed { index, player, mark } => {
                ServerMessage::Move { index, player, mark }
            }
            GameEventData::TurnChanged { turn } => ServerMessage::Turn { turn },
            GameEventData::Won { player } => ServerMessage::Win { player },
            GameEventData::Tied => ServerMessage::Tie,
            GameEventData::RematchOffered => ServerMessage::RematchOffer,
            GameEventData::Reset => ServerMessage::Reset,
            GameEventData::OpponentLeft => ServerMessage::OpponentLeft,
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize from JSON bytes (binary frames).
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
