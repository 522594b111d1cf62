//! WebSocket Game Server
//!
//! Async WebSocket server for match and tournament connections.
//!
//! - `/ws/pong?key=..[&lobby=..][&token=..]` joins a match.
//! - `/ws/tournament[?token=..]` watches the tournament.
//!
//! Each connection gets a reader loop (this task) and a writer task that
//! merges direct replies with the connection's topic subscription.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use url::form_urlencoded;

use crate::config::ServerConfig;
use crate::game::input::PaddleDirection;
use crate::game::state::{MatchId, SessionKey};
use crate::network::auth::IdentityProvider;
use crate::network::directory::RoomDirectory;
use crate::network::fanout::{Notifier, Topic, TopicHub};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::results::{run_outcome_pump, ResultSink};
use crate::network::session::{ConnectionHandle, ConnectionId, MatchOutcome};
use crate::tournament::scheduler::TournamentScheduler;

/// Match endpoint path.
pub const PONG_PATH: &str = "/ws/pong";

/// Tournament endpoint path.
pub const TOURNAMENT_PATH: &str = "/ws/tournament";

/// Query parameter naming an explicit match.
pub const LOBBY_PARAM: &str = "lobby";

/// Per-connection outbound queue depth.
const OUTBOUND_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// `run` was called twice.
    #[error("Server is already running")]
    AlreadyRunning,
}

/// Which endpoint a connection came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Match play.
    Pong,
    /// Tournament updates and commands.
    Tournament,
}

impl Endpoint {
    /// Route a request path.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            PONG_PATH => Some(Endpoint::Pong),
            TOURNAMENT_PATH => Some(Endpoint::Tournament),
            _ => None,
        }
    }
}

/// Connected client state.
struct ConnectedClient {
    addr: SocketAddr,
    key: SessionKey,
    last_activity: Instant,
    sender: mpsc::Sender<ServerMessage>,
}

/// One live connection as seen by the message handlers.
struct ClientConnection {
    id: ConnectionId,
    key: SessionKey,
    endpoint: Endpoint,
    sender: mpsc::Sender<ServerMessage>,
}

impl ClientConnection {
    async fn reply(&self, message: ServerMessage) {
        let _ = self.sender.send(message).await;
    }

    async fn reply_error(&self, code: ErrorCode, message: impl ToString) {
        self.reply(ServerMessage::error(code, message.to_string())).await;
    }

    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.id, self.sender.clone())
    }
}

/// Whether the reader keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Shared services, cloned into every connection task.
#[derive(Clone)]
struct ServerContext {
    config: ServerConfig,
    hub: Arc<TopicHub>,
    directory: Arc<RoomDirectory>,
    tournament: Arc<TournamentScheduler>,
    identity: Arc<dyn IdentityProvider>,
    clients: Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>,
    next_connection: Arc<AtomicU64>,
}

/// The game server.
pub struct GameServer {
    ctx: ServerContext,
    sink: Arc<dyn ResultSink>,
    outcomes: Mutex<Option<mpsc::UnboundedReceiver<MatchOutcome>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityProvider>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let hub = Arc::new(TopicHub::new());
        let directory = Arc::new(RoomDirectory::new(
            config.session_config(),
            hub.clone(),
            outcomes_tx,
        ));
        let tournament = TournamentScheduler::new(config.tournament.clone(), hub.clone(), directory.clone());

        Self {
            ctx: ServerContext {
                config,
                hub,
                directory,
                tournament,
                identity,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
                next_connection: Arc::new(AtomicU64::new(1)),
            },
            sink,
            outcomes: Mutex::new(Some(outcomes_rx)),
            shutdown_tx,
        }
    }

    /// Room directory.
    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.ctx.directory
    }

    /// Tournament scheduler.
    pub fn tournament(&self) -> &Arc<TournamentScheduler> {
        &self.ctx.tournament
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let outcomes = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(GameServerError::AlreadyRunning)?;

        info!("Game server listening on {}", listener.local_addr()?);

        let pump_handle = tokio::spawn(run_outcome_pump(
            outcomes,
            self.sink.clone(),
            self.ctx.tournament.clone(),
            self.ctx.directory.clone(),
            self.ctx.config.finished_grace,
        ));

        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(self.ctx.clone()));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.ctx.clients.read().await.len();
                            if clients_count >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject(stream, ErrorCode::ServerOverloaded, "server is full"));
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
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
        pump_handle.abort();

        Ok(())
    }

    /// Complete the handshake only to tell the client why it is turned away.
    async fn reject(stream: TcpStream, code: ErrorCode, reason: &'static str) {
        let Ok(ws) = accept_async(stream).await else { return };
        let (mut ws_sender, _) = ws.split();
        if let Ok(text) = ServerMessage::error(code, reason).to_json() {
            let _ = ws_sender.send(Message::Text(text)).await;
        }
        let _ = ws_sender.close().await;
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut uri: Option<Uri> = None;
            let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uri = Some(req.uri().clone());
                Ok(resp)
            })
            .await
            {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let path = uri.as_ref().map(|u| u.path()).unwrap_or_default();
            let query = query_params(uri.as_ref().and_then(|u| u.query()));

            let Some(endpoint) = Endpoint::from_path(path) else {
                debug!("Unknown endpoint {} from {}", path, addr);
                close_with(&mut ws_sender, ServerMessage::error(ErrorCode::NotFound, "unknown endpoint")).await;
                return;
            };

            let key = match ctx.identity.identify(&query) {
                Ok(key) => key,
                Err(e) => {
                    info!("Rejected unauthenticated connection from {}: {}", addr, e);
                    close_with(&mut ws_sender, ServerMessage::error(ErrorCode::Unauthenticated, e.to_string())).await;
                    return;
                }
            };

            let id = ctx.next_connection.fetch_add(1, Ordering::Relaxed);
            let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);
            let conn = ClientConnection { id, key: key.clone(), endpoint, sender: msg_tx.clone() };

            // Subscribe before the writer starts so nothing published after the
            // join is missed.
            let updates = match endpoint {
                Endpoint::Pong => {
                    let lobby = query.get(LOBBY_PARAM).filter(|l| !l.is_empty()).map(MatchId::new);
                    match ctx.directory.join_or_create(&key, lobby, conn.handle()).await {
                        Ok(joined) => {
                            info!(
                                "Connection {} ({}) joined match {} as {}",
                                id, key, joined.session.id(), joined.join.outcome.paddle
                            );
                            joined.join.updates
                        }
                        Err(e) => {
                            debug!("Join rejected for {}: {}", key, e);
                            close_with(&mut ws_sender, ServerMessage::error(e.code(), e.to_string())).await;
                            return;
                        }
                    }
                }
                Endpoint::Tournament => {
                    let updates = ctx.hub.subscribe(&Topic::Tournament);
                    conn.reply(ServerMessage::Tournament { state: ctx.tournament.snapshot().await }).await;
                    updates
                }
            };

            {
                let mut clients = ctx.clients.write().await;
                clients.insert(id, ConnectedClient {
                    addr,
                    key: key.clone(),
                    last_activity: Instant::now(),
                    sender: msg_tx,
                });
            }

            let mut writer = tokio::spawn(run_writer(ws_sender, msg_rx, Some(updates)));
            let mut writer_done = false;

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                ctx.touch(id).await;

                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        conn.reply_error(ErrorCode::InvalidInput, "Invalid message format").await;
                                        continue;
                                    }
                                };

                                if ctx.handle_client_message(&conn, client_msg).await == Flow::Close {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                conn.reply_error(ErrorCode::InvalidInput, "Binary frames are not supported").await;
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                ctx.touch(id).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut writer => {
                        // Writer stopped: superseded, idle, or the socket broke.
                        writer_done = true;
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        conn.reply(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            ctx.clients.write().await.remove(&id);
            if endpoint == Endpoint::Pong {
                ctx.directory.disconnect(&key, id).await;
            }

            // Let a queued closing message go out before tearing down.
            drop(conn);
            if !writer_done && tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
                writer.abort();
            }

            info!("Client {} ({}) cleaned up", addr, key);
        });
    }

    /// Close idle connections.
    async fn run_cleanup_loop(ctx: ServerContext) {
        let idle_timeout = ctx.config.idle_timeout;
        let period = (idle_timeout / 4).max(Duration::from_secs(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let now = Instant::now();
            let clients = ctx.clients.read().await;
            for (id, client) in clients.iter() {
                if now.duration_since(client.last_activity) > idle_timeout {
                    info!("Closing idle connection {} ({}, {})", id, client.addr, client.key);
                    let _ = client.sender.try_send(ServerMessage::Shutdown {
                        reason: "idle timeout".to_string(),
                    });
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.ctx.clients.read().await.len()
    }

    /// Get registered match count.
    pub async fn match_count(&self) -> usize {
        self.ctx.directory.match_count().await
    }
}

impl ServerContext {
    async fn touch(&self, id: ConnectionId) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(&id) {
            client.last_activity = Instant::now();
        }
    }

    /// Handle a client message.
    async fn handle_client_message(&self, conn: &ClientConnection, msg: ClientMessage) -> Flow {
        match msg {
            ClientMessage::Ping { timestamp } => {
                conn.reply(ServerMessage::Pong { timestamp, server_time: now_millis() }).await;
            }
            ClientMessage::ListLobbies => {
                let lobbies = self.directory.list().await;
                conn.reply(ServerMessage::Lobbies { lobbies }).await;
            }

            // Tournament commands, accepted on both endpoints.
            ClientMessage::CreateTournament => {
                if let Err(e) = self.tournament.create(&conn.key).await {
                    conn.reply_error(e.code(), e).await;
                }
            }
            ClientMessage::SignUp { display_name } => {
                if let Err(e) = self.tournament.sign_up(&conn.key, &display_name).await {
                    conn.reply_error(e.code(), e).await;
                }
            }
            ClientMessage::Withdraw => {
                if let Err(e) = self.tournament.withdraw(&conn.key).await {
                    conn.reply_error(e.code(), e).await;
                }
            }
            ClientMessage::AssignMatch { pairing } => {
                match self.tournament.assign_match(pairing).await {
                    Ok(assignment) => {
                        conn.reply(ServerMessage::MatchAssigned { pairing, match_id: assignment.match_id }).await;
                    }
                    Err(e) => conn.reply_error(e.code(), e).await,
                }
            }
            ClientMessage::ReportResult { match_id, winner } => {
                if let Err(e) = self.tournament.report_result(&match_id, &winner, None).await {
                    conn.reply_error(e.code(), e).await;
                }
            }
            ClientMessage::CloseTournament => {
                if let Err(e) = self.tournament.close().await {
                    conn.reply_error(e.code(), e).await;
                }
            }

            ClientMessage::PaddleMove { .. }
            | ClientMessage::PaddleStop
            | ClientMessage::PlayerReady
            | ClientMessage::Leave => return self.handle_match_message(conn, msg).await,
        }
        Flow::Continue
    }

    async fn handle_match_message(&self, conn: &ClientConnection, msg: ClientMessage) -> Flow {
        if conn.endpoint != Endpoint::Pong {
            conn.reply_error(ErrorCode::InvalidInput, "match commands need the match endpoint").await;
            return Flow::Continue;
        }

        if msg == ClientMessage::Leave {
            if let Err(e) = self.directory.leave(&conn.key).await {
                conn.reply_error(e.code(), e).await;
            }
            return Flow::Close;
        }

        let Some(session) = self.directory.session_for(&conn.key).await else {
            conn.reply_error(ErrorCode::NotInMatch, "not in a match").await;
            return Flow::Continue;
        };

        let result = match msg {
            ClientMessage::PaddleMove { key } => match PaddleDirection::from_key(&key) {
                Some(direction) => session.apply_input(&conn.key, direction).await.map(|_| ()),
                None => {
                    conn.reply_error(ErrorCode::InvalidInput, format!("unknown key {:?}", key)).await;
                    return Flow::Continue;
                }
            },
            ClientMessage::PaddleStop => session.apply_input(&conn.key, PaddleDirection::Stop).await.map(|_| ()),
            ClientMessage::PlayerReady => session.set_ready(&conn.key).await.map(|_| ()),
            _ => Ok(()),
        };

        if let Err(e) = result {
            conn.reply_error(ErrorCode::from(&e), e).await;
        }
        Flow::Continue
    }
}

/// Forward direct replies and topic broadcasts to the socket.
async fn run_writer(
    mut ws_sender: WsSink,
    mut direct: mpsc::Receiver<ServerMessage>,
    mut topic: Option<broadcast::Receiver<ServerMessage>>,
) {
    loop {
        // Direct replies first, so a join's assignment precedes topic traffic.
        let msg = tokio::select! {
            biased;

            msg = direct.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            received = recv_topic(&mut topic) => match received {
                Ok(msg) => msg,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} messages", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    topic = None;
                    continue;
                }
            },
        };

        let text = match msg.to_json() {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };
        if ws_sender.send(Message::Text(text)).await.is_err() {
            break;
        }
        if msg.closes_connection() {
            let _ = ws_sender.close().await;
            break;
        }
    }
}

async fn recv_topic(topic: &mut Option<broadcast::Receiver<ServerMessage>>) -> Result<ServerMessage, RecvError> {
    match topic {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn close_with(ws_sender: &mut WsSink, message: ServerMessage) {
    if let Ok(text) = message.to_json() {
        let _ = ws_sender.send(Message::Text(text)).await;
    }
    let _ = ws_sender.close().await;
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// QUERY STRING
// =============================================================================

/// Decode `a=1&b=two%20words` into a map. Later duplicates win.
fn query_params(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}
