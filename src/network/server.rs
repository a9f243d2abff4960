//! WebSocket Game Server
//!
//! Async WebSocket gateway for two-player sessions.
//! Resolves the upgrade path to a session, seats the connection, and routes
//! its messages to that session until it disconnects.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::input::ParticipantIndex;
use crate::game::state::{ConnectionId, SessionId};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{Outbox, SessionConfig, SessionError, SessionManager};

/// How long a closing connection may take to flush its outbound queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections, including those still in the handshake.
    pub max_connections: usize,
    /// How long a socket may take to complete the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Maximum live sessions.
    pub max_sessions: usize,
    /// Per-connection outbound queue length.
    pub channel_capacity: usize,
    /// How long a session may sit with no participants before removal.
    pub empty_session_ttl: Duration,
    /// How often empty sessions are swept.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
    /// Per-session options.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            max_sessions: 10_000,
            channel_capacity: 64,
            empty_session_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from `NOUGHTS_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self, GameServerError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env_var("NOUGHTS_BIND_ADDR", defaults.bind_addr)?,
            max_connections: env_var("NOUGHTS_MAX_CONNECTIONS", defaults.max_connections)?,
            handshake_timeout: env_var("NOUGHTS_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout.as_secs())
                .map(Duration::from_secs)?,
            max_sessions: env_var("NOUGHTS_MAX_SESSIONS", defaults.max_sessions)?,
            channel_capacity: env_var("NOUGHTS_CHANNEL_CAPACITY", defaults.channel_capacity)?,
            empty_session_ttl: env_var("NOUGHTS_EMPTY_SESSION_TTL_SECS", defaults.empty_session_ttl.as_secs())
                .map(Duration::from_secs)?,
            cleanup_interval: env_var("NOUGHTS_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval.as_secs())
                .map(Duration::from_secs)?,
            version: defaults.version,
            session: SessionConfig::from_env(),
        })
    }
}

fn env_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, GameServerError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| GameServerError::Config { var: name, value }),
        Err(_) => Ok(default),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Bad configuration value.
    #[error("Invalid value for {var}: {value:?}")]
    Config {
        /// Environment variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// ROUTING
// =============================================================================

/// Where an upgrade request asked to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/game/new`: create a session and take its first seat.
    NewGame,
    /// `/game/<id>`: join an existing session.
    Join(SessionId),
}

impl Route {
    /// Resolve an upgrade path. `None` for anything that is not a game path.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix("/game/")?.trim_end_matches('/');
        match rest {
            "new" => Some(Route::NewGame),
            id => SessionId::parse_str(id).ok().map(Route::Join),
        }
    }
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Game not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

// =============================================================================
// SERVER
// =============================================================================

/// Seat held by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Membership {
    session_id: SessionId,
    player: ParticipantIndex,
}

/// Connected client state.
struct ConnectedClient {
    /// Peer address.
    addr: SocketAddr,
    /// Seat, once joined.
    membership: Option<Membership>,
    /// Connection time.
    connected_at: Instant,
}

type Clients = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session registry.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Clients,
    /// Connection id source.
    next_connection: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = SessionManager::new(config.session.clone(), config.max_sessions);

        Self {
            config,
            sessions: Arc::new(sessions),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            next_connection: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Game server listening on {}", listener.local_addr()?);

        let cleanup_sessions = self.sessions.clone();
        let cleanup_interval = self.config.cleanup_interval;
        let empty_session_ttl = self.config.empty_session_ttl;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_sessions, cleanup_interval, empty_session_ttl).await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Some(connection_id) = self.register_client(addr).await else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {} as {}", addr, connection_id);
                            self.handle_connection(stream, addr, connection_id);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Reserve a slot in the connection registry, ahead of the handshake.
    async fn register_client(&self, addr: SocketAddr) -> Option<ConnectionId> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return None;
        }

        let connection_id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        clients.insert(connection_id, ConnectedClient {
            addr,
            membership: None,
            connected_at: Instant::now(),
        });
        Some(connection_id)
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, connection_id: ConnectionId) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let channel_capacity = self.config.channel_capacity;
        let handshake_timeout = self.config.handshake_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let (ws_stream, route) = match timeout(handshake_timeout, Self::accept_websocket(stream)).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    debug!("WebSocket handshake refused for {}: {}", addr, e);
                    Self::handle_disconnect(connection_id, &clients, &sessions).await;
                    return;
                }
                Err(_) => {
                    debug!("WebSocket handshake timed out for {}", addr);
                    Self::handle_disconnect(connection_id, &clients, &sessions).await;
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(channel_capacity);
            let outbox = Outbox::new(msg_tx);
            let eviction = outbox.eviction();

            // Writer: drains the queue in order, then closes the socket once
            // every sender (ours and the session's) is gone.
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            match Self::join_route(route, connection_id, &sessions, &outbox).await {
                Ok(membership) => {
                    {
                        let mut clients = clients.write().await;
                        if let Some(client) = clients.get_mut(&connection_id) {
                            client.membership = Some(membership);
                        }
                    }
                    info!(
                        "{} ({}) joined session {} as player {}",
                        connection_id, addr, membership.session_id, membership.player
                    );

                    tokio::select! {
                        _ = Self::read_loop(connection_id, &mut ws_receiver, &clients, &sessions, &mut shutdown_rx) => {}
                        _ = eviction.notified() => {
                            info!("{} ({}) dropped: not reading its messages", connection_id, addr);
                        }
                    }
                }
                Err(e) => {
                    info!("Rejected {} ({}): {}", connection_id, addr, e);
                }
            }

            Self::handle_disconnect(connection_id, &clients, &sessions).await;

            drop(outbox);
            if timeout(WRITER_DRAIN_TIMEOUT, &mut sender_task).await.is_err() {
                debug!("{} writer did not drain in time", connection_id);
                sender_task.abort();
            }
        });
    }

    /// Perform the upgrade, resolving the request path to a [`Route`].
    /// Paths that are not game paths get a 404 instead of an upgrade.
    async fn accept_websocket(
        stream: TcpStream,
    ) -> Result<(WebSocketStream<TcpStream>, Route), GameServerError> {
        let mut route = None;
        let callback = |request: &Request, response: Response| {
            match Route::parse(request.uri().path()) {
                Some(resolved) => {
                    route = Some(resolved);
                    Ok(response)
                }
                None => Err(not_found()),
            }
        };

        let ws_stream = accept_hdr_async(stream, callback).await?;
        let route = route.ok_or_else(|| GameServerError::Internal("route not resolved".to_string()))?;
        Ok((ws_stream, route))
    }

    /// Create or look up the session named by the route and take a seat.
    async fn join_route(
        route: Route,
        connection_id: ConnectionId,
        sessions: &Arc<SessionManager>,
        outbox: &Outbox,
    ) -> Result<Membership, GameServerError> {
        let session_id = match route {
            Route::Join(id) => id,
            Route::NewGame => {
                let id = sessions.create_session().await?;
                // Fresh queue, cannot be full
                let _ = outbox.push(ServerMessage::Session { game_id: id });
                id
            }
        };

        let (_, player) = sessions.join_session(&session_id, connection_id, outbox.clone()).await?;
        Ok(Membership { session_id, player })
    }

    /// Route inbound frames until the peer goes away or the server stops.
    async fn read_loop<S>(
        connection_id: ConnectionId,
        ws_receiver: &mut S,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    let parsed = match msg {
                        Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                        Some(Ok(Message::Binary(data))) => ClientMessage::from_slice(&data),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("{} disconnected", connection_id);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", connection_id, e);
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };

                    match parsed {
                        Ok(client_msg) => {
                            if let Err(e) = Self::handle_client_message(connection_id, client_msg, clients, sessions).await {
                                debug!("Dropped message from {}: {}", connection_id, e);
                            }
                        }
                        Err(e) => {
                            // Malformed input is dropped without a reply.
                            debug!("Invalid message from {}: {}", connection_id, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }

    /// Hand a client message to the sender's session.
    async fn handle_client_message(
        connection_id: ConnectionId,
        msg: ClientMessage,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
    ) -> Result<(), SessionError> {
        let membership = {
            let clients = clients.read().await;
            clients
                .get(&connection_id)
                .and_then(|c| c.membership)
                .ok_or(SessionError::NotInSession)?
        };

        let session = sessions
            .get_session(&membership.session_id)
            .await
            .ok_or(SessionError::SessionNotFound(membership.session_id))?;

        session.write().await.handle(membership.player, msg.to_action());
        Ok(())
    }

    /// Forget the connection and free its seat.
    async fn handle_disconnect(
        connection_id: ConnectionId,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
    ) {
        let client = clients.write().await.remove(&connection_id);
        let Some(client) = client else {
            return;
        };

        if let Some(membership) = client.membership {
            if let Some(session) = sessions.get_session(&membership.session_id).await {
                session.write().await.leave(connection_id);
            }
        }

        info!(
            "{} ({}) cleaned up after {:?}",
            connection_id,
            client.addr,
            client.connected_at.elapsed()
        );
    }

    /// Periodically drop sessions nobody has occupied for a while.
    async fn run_cleanup_loop(sessions: Arc<SessionManager>, every: Duration, ttl: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;
            let removed = sessions.cleanup(ttl).await;
            if removed > 0 {
                debug!("Cleanup removed {} empty sessions", removed);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get connection count, including sockets still in the handshake.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}
