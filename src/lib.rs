//! # Noughts Server
//!
//! Authoritative two-player tic-tac-toe over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      NOUGHTS SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Session logic (pure, synchronous)        │
//! │  ├── board.rs     - Cells, marks, win/tie evaluation         │
//! │  ├── input.rs     - Seats and participant actions            │
//! │  ├── state.rs     - Session state machine                    │
//! │  └── events.rs    - Addressed events from transitions        │
//! │                                                              │
//! │  network/         - Networking (async)                       │
//! │  ├── server.rs    - WebSocket gateway and routing            │
//! │  ├── protocol.rs  - Message types                            │
//! │  └── session.rs   - Session registry and event delivery      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Lifecycle
//!
//! A client opens `/game/new` to create a session and take seat 0 (X), then
//! shares the returned id. The opponent opens `/game/<id>` and takes seat 1
//! (O), which starts the game. After a win or tie the board is already
//! clean; play resumes once either side sends `rematchAccepted`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::board::{Board, Mark, Outcome};
pub use game::input::{Action, ParticipantIndex};
pub use game::state::{Session, SessionId, Phase};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
