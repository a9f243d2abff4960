//! Match Session Management
//!
//! Wraps the game-level [`Session`] with the outbound queues of its seated
//! connections, and keeps the process-wide registry of sessions.
//!
//! All mutation of one session happens under its `RwLock` write guard, and
//! the events a transition produced are queued to the recipients' channels
//! before the guard is released. Events for one move therefore reach both
//! clients in order and never interleave with a later move's events.
//!
//! Queuing never waits. A participant whose queue is full has stopped
//! reading; it loses its seat and its connection is told to close.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::game::events::{GameEvent, Recipient};
use crate::game::input::{Action, ParticipantIndex};
use crate::game::state::{ConnectionId, JoinError, Phase, Session, SessionId};
use crate::network::protocol::ServerMessage;

/// Configuration applied to every new session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Tell the remaining participant when the opponent disconnects.
    pub notify_opponent_left: bool,
}

impl SessionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            notify_opponent_left: std::env::var("NOUGHTS_NOTIFY_OPPONENT_LEFT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Outbound side of one connection, as handed to a session.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerMessage>,
    evicted: Arc<Notify>,
}

impl Outbox {
    /// Wrap a connection's outbound queue.
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            sender,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Signalled once if the session drops this connection for not reading.
    pub fn eviction(&self) -> Arc<Notify> {
        self.evicted.clone()
    }

    /// Queue a message without waiting.
    pub fn push(&self, message: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.sender.try_send(message)
    }
}

/// A connection seated in a session.
#[derive(Debug)]
struct SessionPlayer {
    connection: ConnectionId,
    outbox: Outbox,
}

/// A match session.
pub struct MatchSession {
    /// Authoritative game state.
    game: Session,
    /// Outbound queues by seat.
    players: BTreeMap<ParticipantIndex, SessionPlayer>,
    /// When session was created.
    created_at: Instant,
    /// When the last participant left, if the session is empty.
    empty_since: Option<Instant>,
}

impl MatchSession {
    /// Create a new session.
    pub fn new(id: SessionId, config: &SessionConfig) -> Self {
        let now = Instant::now();
        Self {
            game: Session::new(id).with_leave_notice(config.notify_opponent_left),
            players: BTreeMap::new(),
            created_at: now,
            empty_since: Some(now),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.game.id()
    }

    /// Game state.
    pub fn game(&self) -> &Session {
        &self.game
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.game.phase()
    }

    /// Get player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Seat a connection and deliver the resulting events.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<ParticipantIndex, SessionError> {
        let (index, events) = self.game.join(connection)?;

        self.players.insert(index, SessionPlayer { connection, outbox });
        self.empty_since = None;

        debug!(session = %self.id(), %connection, player = %index, "Participant seated");
        self.dispatch(events);

        Ok(index)
    }

    /// Apply an action from a seat and deliver the resulting events.
    pub fn handle(&mut self, index: ParticipantIndex, action: Action) {
        let events = self.game.handle(index, action);
        self.dispatch(events);
    }

    /// Remove a connection. Returns false if it held no seat here.
    pub fn leave(&mut self, connection: ConnectionId) -> bool {
        let Some(index) = self.game.seat_of(connection) else {
            return false;
        };

        self.players.remove(&index);
        if self.players.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        debug!(session = %self.id(), %connection, player = %index, "Participant left");
        let events = self.game.leave(connection);
        self.dispatch(events);
        true
    }

    /// Deliver events in order. Seats whose queue overflowed are evicted
    /// once the batch is out, and the events of that eviction follow.
    fn dispatch(&mut self, events: Vec<GameEvent>) {
        let mut pending = events;

        while !pending.is_empty() {
            let mut stalled = Vec::new();
            for event in pending.drain(..) {
                let message = ServerMessage::from(&event.data);
                for (&index, player) in &self.players {
                    if !event.recipient.includes(index) || stalled.contains(&index) {
                        continue;
                    }
                    match player.outbox.push(message.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => stalled.push(index),
                        Err(TrySendError::Closed(_)) => {
                            debug!(session = %self.id(), connection = %player.connection, "Outbound channel closed");
                        }
                    }
                }
            }

            for index in stalled {
                pending.extend(self.evict(index));
            }
        }
    }

    /// Drop a seat whose connection stopped reading.
    fn evict(&mut self, index: ParticipantIndex) -> Vec<GameEvent> {
        let Some(player) = self.players.remove(&index) else {
            return Vec::new();
        };

        warn!(session = %self.id(), connection = %player.connection, player = %index, "Outbound queue full, dropping participant");
        player.outbox.evicted.notify_one();
        if self.players.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        self.game.leave(player.connection)
    }

    /// How long the session has had no participants.
    pub fn empty_for(&self, now: Instant) -> Option<Duration> {
        self.empty_since.map(|since| now.saturating_duration_since(since))
    }

    /// Session age.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Session errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No session with that id.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session is full.
    #[error("Session is full")]
    SessionFull,

    /// Connection already seated in this session.
    #[error("Already in session")]
    AlreadyInSession,

    /// Registry at capacity.
    #[error("Session limit reached")]
    TooManySessions,

    /// Connection holds no seat.
    #[error("Not in a session")]
    NotInSession,
}

impl From<JoinError> for SessionError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::SessionFull => SessionError::SessionFull,
            JoinError::AlreadySeated => SessionError::AlreadyInSession,
        }
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Registry of all active sessions.
///
/// Constructed once by the server and shared by `Arc`; it is the only
/// cross-connection state besides the sessions themselves.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<MatchSession>>>>,
    /// Config for new sessions.
    config: SessionConfig,
    /// Registry capacity.
    max_sessions: usize,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new(config: SessionConfig, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            config,
            max_sessions,
        }
    }

    /// Create a new, empty session.
    pub async fn create_session(&self) -> Result<SessionId, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::TooManySessions);
        }

        let id = SessionId::new_v4();
        sessions.insert(id, Arc::new(RwLock::new(MatchSession::new(id, &self.config))));
        info!(session = %id, "Session created");
        Ok(id)
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<MatchSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Seat a connection in an existing session.
    pub async fn join_session(
        &self,
        id: &SessionId,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Result<(Arc<RwLock<MatchSession>>, ParticipantIndex), SessionError> {
        let session = self
            .get_session(id)
            .await
            .ok_or(SessionError::SessionNotFound(*id))?;

        let index = session.write().await.join(connection, outbox)?;
        Ok((session, index))
    }

    /// Remove a session.
    pub async fn remove_session(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Remove sessions that have been empty for longer than `ttl`.
    /// Returns how many were removed.
    ///
    /// Sessions are inspected with `try_read` and without the registry
    /// lock held; a session that is busy is left for the next sweep.
    pub async fn cleanup(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired = |session: &Arc<RwLock<MatchSession>>| {
            session
                .try_read()
                .is_ok_and(|s| s.empty_for(now).is_some_and(|idle| idle > ttl))
        };

        let snapshot: Vec<(SessionId, Arc<RwLock<MatchSession>>)> = {
            let sessions = self.sessions.read().await;
            let snapshot = sessions.iter().map(|(id, session)| (*id, session.clone())).collect();
            snapshot
        };

        let candidates: Vec<SessionId> = snapshot
            .into_iter()
            .filter(|(_, session)| expired(session))
            .map(|(id, _)| id)
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for id in candidates {
            // Someone may have joined since the scan.
            if !sessions.get(&id).is_some_and(&expired) {
                continue;
            }
            if let Some(session) = sessions.remove(&id) {
                let age = session.try_read().map(|s| s.age(now)).unwrap_or_default();
                info!(session = %id, age_secs = age.as_secs(), "Removed empty session");
                removed += 1;
            }
        }

        removed
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default(), 10_000)
    }
}
