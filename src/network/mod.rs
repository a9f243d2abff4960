//! Network Layer
//!
//! WebSocket gateway and session registry.
//! All game rules live in `game/`; this layer only routes and delivers.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
pub use session::{MatchSession, Outbox, SessionConfig, SessionError, SessionManager};
pub use server::{GameServer, GameServerError, Route, ServerConfig};
