//! WebSocket Feed Server
//!
//! Serves a single game session to remote presentation clients. Clients get
//! a JSON snapshot every frame plus round events, and send commands back.
//!
//! The session has exactly one owner: the driver task. Connection tasks only
//! forward commands to it over a channel and relay the broadcast feed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::network::gateway::SessionGateway;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{GameSession, SessionError};

/// How long teardown waits for settlement reports in flight.
const REPORT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Snapshot and flight frame rate (Hz).
    pub frame_rate: u32,
    /// Fixed seed for the round generator.
    pub rng_seed: Option<u64>,
    /// Verify and start rounds as soon as the driver runs.
    pub auto_start: bool,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 16,
            frame_rate: crate::FRAME_RATE,
            rng_seed: None,
            auto_start: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("CRASH_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("CRASH_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            frame_rate: std::env::var("CRASH_FRAME_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|hz| *hz > 0)
                .unwrap_or(defaults.frame_rate),
            rng_seed: std::env::var("CRASH_RNG_SEED").ok().and_then(|v| v.parse().ok()),
            auto_start: std::env::var("CRASH_AUTO_START")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.auto_start),
            version: defaults.version,
        }
    }

    /// Interval between frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.frame_rate.max(1) as u64)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// `run` was called twice.
    #[error("Server already running")]
    AlreadyRunning,
}

/// A command from a connection, with the channel its reply goes to.
#[derive(Debug)]
pub struct Command {
    /// Sending connection.
    pub client_id: Uuid,
    /// The command.
    pub message: ClientMessage,
    /// Reply channel of the sending connection.
    pub reply: mpsc::Sender<ServerMessage>,
}

/// Connected client state.
struct ConnectedClient {
    addr: SocketAddr,
    connected_at: Instant,
    last_activity: Instant,
}

/// Everything the driver task takes ownership of.
struct DriverParts<G: SessionGateway> {
    session: GameSession<G>,
    commands: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
}

/// The feed server.
pub struct GameServer<G: SessionGateway> {
    /// Server configuration.
    config: ServerConfig,
    /// Session, command queue and shutdown signal until `run` takes them.
    driver: Mutex<Option<DriverParts<G>>>,
    /// Command queue into the driver.
    command_tx: mpsc::Sender<Command>,
    /// Snapshot and event feed.
    feed_tx: broadcast::Sender<ServerMessage>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<Uuid, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<G: SessionGateway> GameServer<G> {
    /// Create a server around `session`.
    pub fn new(config: ServerConfig, session: GameSession<G>) -> Self {
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let (command_tx, commands) = mpsc::channel(256);
        let (feed_tx, _) = broadcast::channel(256);

        Self {
            config,
            driver: Mutex::new(Some(DriverParts {
                session,
                commands,
                shutdown,
            })),
            command_tx,
            feed_tx,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the driver and accept connections until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let parts = self.driver.lock().await.take().ok_or(GameServerError::AlreadyRunning)?;
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Feed server listening on {}", self.config.bind_addr);

        let mut driver = tokio::spawn(run_driver(
            parts.session,
            parts.commands,
            self.feed_tx.clone(),
            self.config.frame_interval(),
            self.config.auto_start,
            parts.shutdown,
        ));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_connection(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                result = &mut driver => {
                    if let Err(e) = result {
                        error!("Driver task failed: {}", e);
                    }
                    info!("Driver stopped");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let command_tx = self.command_tx.clone();
        let mut feed_rx = self.feed_tx.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let version = self.config.version.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let client_id = Uuid::new_v4();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(64);

            clients.write().await.insert(client_id, ConnectedClient {
                addr,
                connected_at: Instant::now(),
                last_activity: Instant::now(),
            });

            let _ = reply_tx
                .send(ServerMessage::Hello {
                    client_id: client_id.to_string(),
                    server_version: version,
                })
                .await;

            // Merge direct replies and the shared feed onto the socket
            let mut sender_task = tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        Some(msg) = reply_rx.recv() => msg,
                        feed = feed_rx.recv() => match feed {
                            Ok(msg) => msg,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!("Client {} lagged by {} frames", client_id, skipped);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        else => break,
                    };
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    let is_shutdown = matches!(msg, ServerMessage::Shutdown { .. });
                    if ws_sender.send(Message::Text(text)).await.is_err() || is_shutdown {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let message = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", client_id, e);
                                        let _ = reply_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidMessage,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                if let Some(client) = clients.write().await.get_mut(&client_id) {
                                    client.last_activity = Instant::now();
                                }

                                let command = Command {
                                    client_id,
                                    message,
                                    reply: reply_tx.clone(),
                                };
                                if command_tx.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", client_id);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", client_id, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Let the sender drain queued replies, then stop it
            drop(reply_tx);
            if tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            if let Some(client) = clients.write().await.remove(&client_id) {
                info!(
                    "Client {} ({}) cleaned up after {:?}, {:?} idle",
                    client_id,
                    client.addr,
                    client.connected_at.elapsed(),
                    client.last_activity.elapsed()
                );
            }
        });
    }

    /// Shutdown the server. The session is torn down and pending reports flushed.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Queue a command as if it came from a client.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.command_tx.clone()
    }

    /// Subscribe to the snapshot and event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.feed_tx.subscribe()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Complete the handshake, tell the client the server is full, and close.
async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with rejected client {} failed: {}", addr, e);
            return;
        }
    };
    let overloaded = ServerMessage::error(ErrorCode::ServerOverloaded, "Too many connections");
    if let Ok(text) = overloaded.to_json() {
        let _ = ws_stream.send(Message::Text(text)).await;
    }
    let _ = ws_stream.close(None).await;
}

// =============================================================================
// DRIVER
// =============================================================================

/// Own the session: tick it every frame, apply commands in arrival order,
/// publish the feed. Returns the torn-down session on shutdown.
async fn run_driver<G: SessionGateway>(
    mut session: GameSession<G>,
    mut commands: mpsc::Receiver<Command>,
    feed: broadcast::Sender<ServerMessage>,
    frame: Duration,
    auto_start: bool,
    mut shutdown: broadcast::Receiver<()>,
) -> GameSession<G> {
    let epoch = Instant::now();

    if auto_start {
        if let Err(e) = session.start(epoch.elapsed()).await {
            warn!(error = %e, "session did not start");
        }
        publish(&mut session, &feed, epoch.elapsed());
    }

    let mut frames = interval(frame);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = epoch.elapsed();
                session.tick(now);
                publish(&mut session, &feed, now);
            }
            Some(command) = commands.recv() => {
                let now = epoch.elapsed();
                debug!(client = %command.client_id, command = command.message.name(), "command");
                let reply = apply_command(&mut session, command.message, now).await;
                // A client that stops reading loses replies, never the driver
                if let Err(e) = command.reply.try_send(reply) {
                    debug!(client = %command.client_id, error = %e, "reply dropped");
                }
                publish(&mut session, &feed, epoch.elapsed());
            }
            _ = shutdown.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.teardown();
    let now = epoch.elapsed();
    if tokio::time::timeout(REPORT_FLUSH_TIMEOUT, session.flush_reports(now)).await.is_err() {
        warn!(pending = session.pending_reports(), "gave up waiting for bet reports");
    }
    publish(&mut session, &feed, now);
    let _ = feed.send(ServerMessage::Shutdown {
        reason: "Server shutting down".to_string(),
    });
    session
}

fn publish<G: SessionGateway>(
    session: &mut GameSession<G>,
    feed: &broadcast::Sender<ServerMessage>,
    now: Duration,
) {
    // Sending fails only when nobody is subscribed
    for event in session.drain_events() {
        let _ = feed.send(ServerMessage::Event(event));
    }
    let _ = feed.send(ServerMessage::Snapshot(session.snapshot(now)));
}

/// Apply one client command to the session and build the reply.
pub async fn apply_command<G: SessionGateway>(
    session: &mut GameSession<G>,
    message: ClientMessage,
    now: Duration,
) -> ServerMessage {
    let name = message.name();
    let result = match message {
        ClientMessage::Start => session.start(now).await,
        ClientMessage::PlaceBet => session.place_bet(now).map(|_| ()),
        ClientMessage::CashOut => session.cash_out(now).map(|_| ()),
        ClientMessage::Continue => session.continue_round(now),
        ClientMessage::SetBetAmount { amount } => session.set_bet_amount(amount).map(|_| ()),
        ClientMessage::ToggleAutoBet => session.toggle_auto_bet(now).map(|_| ()),
        ClientMessage::Ping { timestamp } => {
            return ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis() as u64,
            };
        }
    };
    reply_for(name, result)
}

fn reply_for(command: &str, result: Result<(), SessionError>) -> ServerMessage {
    let command = command.to_string();
    match result {
        Ok(()) => ServerMessage::Ack { command },
        Err(SessionError::Rejected(rejection)) => ServerMessage::Rejected {
            command,
            reason: rejection.to_string(),
        },
        Err(SessionError::AlreadyStarted) => ServerMessage::Rejected {
            command,
            reason: SessionError::AlreadyStarted.to_string(),
        },
        Err(SessionError::MissingToken) => {
            ServerMessage::error(ErrorCode::MissingToken, "No session token provided")
        }
        Err(SessionError::Verification(e)) => {
            ServerMessage::error(ErrorCode::VerificationFailed, e.user_message())
        }
        Err(SessionError::NotStarted) => {
            ServerMessage::error(ErrorCode::NotStarted, "Session not started")
        }
        Err(SessionError::Closed) => {
            ServerMessage::error(ErrorCode::SessionClosed, "Session closed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::BetRejection;
    use crate::game::scheduler::RoundConfig;
    use crate::game::state::RoundPhase;
    use crate::network::auth::Credentials;
    use crate::network::gateway::{BetReport, GatewayError, PlayerProfile};
    use crate::network::session::SessionStage;

    struct StaticGateway;

    impl SessionGateway for StaticGateway {
        async fn verify(&self, token: &str) -> Result<PlayerProfile, GatewayError> {
            if token == "good" {
                Ok(PlayerProfile {
                    balance: 1_000.0,
                    display_name: "cy".into(),
                    default_bet_amount: 10.0,
                })
            } else {
                Err(GatewayError::Rejected("Unknown token".into()))
            }
        }

        async fn report_result(&self, _report: BetReport) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn session(token: &str) -> GameSession<StaticGateway> {
        GameSession::new(
            Arc::new(StaticGateway),
            Credentials::new(Some("game-9".into()), Some(token.into())),
            RoundConfig::default(),
            7,
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.frame_interval(), Duration::from_micros(16_666));
        assert!(config.auto_start);
        assert!(config.rng_seed.is_none());
    }

    #[test]
    fn test_reply_mapping() {
        assert_eq!(
            reply_for("place_bet", Ok(())),
            ServerMessage::Ack { command: "place_bet".into() }
        );
        assert_eq!(
            reply_for("cash_out", Err(SessionError::Rejected(BetRejection::NoActiveBet))),
            ServerMessage::Rejected {
                command: "cash_out".into(),
                reason: "no active bet".into(),
            }
        );
        assert!(matches!(
            reply_for("start", Err(SessionError::Verification(GatewayError::Rejected("nope".into())))),
            ServerMessage::Error(e) if e.code == ErrorCode::VerificationFailed && e.message == "nope"
        ));
    }

    #[tokio::test]
    async fn test_apply_command() {
        let mut s = session("good");
        let now = Duration::ZERO;

        assert!(matches!(
            apply_command(&mut s, ClientMessage::PlaceBet, now).await,
            ServerMessage::Error(e) if e.code == ErrorCode::NotStarted
        ));
        assert_eq!(
            apply_command(&mut s, ClientMessage::Start, now).await,
            ServerMessage::Ack { command: "start".into() }
        );
        assert_eq!(
            apply_command(&mut s, ClientMessage::SetBetAmount { amount: 25.0 }, now).await,
            ServerMessage::Ack { command: "set_bet_amount".into() }
        );
        assert_eq!(
            apply_command(&mut s, ClientMessage::PlaceBet, now).await,
            ServerMessage::Ack { command: "place_bet".into() }
        );
        assert_eq!(s.scheduler().unwrap().ledger().balance(), 975.0);
        assert!(matches!(
            apply_command(&mut s, ClientMessage::Ping { timestamp: 5 }, now).await,
            ServerMessage::Pong { timestamp: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_start_with_bad_token() {
        let mut s = session("bad");
        assert!(matches!(
            apply_command(&mut s, ClientMessage::Start, Duration::ZERO).await,
            ServerMessage::Error(e) if e.code == ErrorCode::VerificationFailed && e.message == "Unknown token"
        ));
        assert!(matches!(s.stage(), SessionStage::PreGame { .. }));
    }

    #[tokio::test]
    async fn test_driver_applies_commands_and_publishes() {
        let (command_tx, commands) = mpsc::channel(16);
        let (feed_tx, mut feed_rx) = broadcast::channel(1024);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let driver = tokio::spawn(run_driver(
            session("good"),
            commands,
            feed_tx,
            Duration::from_millis(16),
            true,
            shutdown_rx,
        ));

        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        command_tx
            .send(Command {
                client_id: Uuid::new_v4(),
                message: ClientMessage::PlaceBet,
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(
            reply_rx.recv().await.unwrap(),
            ServerMessage::Ack { command: "place_bet".into() }
        );

        loop {
            match feed_rx.recv().await {
                Ok(ServerMessage::Snapshot(snap)) => {
                    if let Some(round) = snap.round.filter(|r| r.has_placed_bet) {
                        assert_eq!(round.phase, RoundPhase::Betting);
                        assert_eq!(round.balance, 990.0);
                        break;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("feed closed: {e}"),
            }
        }

        shutdown_tx.send(()).unwrap();
        let session = driver.await.unwrap();
        assert_eq!(session.stage(), &SessionStage::Closed);
        assert!(session.scheduler().unwrap().is_halted());
    }

    #[tokio::test]
    async fn test_driver_keeps_publishing_past_unread_replies() {
        let (command_tx, commands) = mpsc::channel(16);
        let (feed_tx, mut feed_rx) = broadcast::channel(4096);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let driver = tokio::spawn(run_driver(
            session("good"),
            commands,
            feed_tx,
            Duration::from_millis(16),
            true,
            shutdown_rx,
        ));

        // Capacity one, never drained: the second and third replies have nowhere to go
        let (reply_tx, _reply_rx) = mpsc::channel(1);
        for timestamp in 0..3 {
            command_tx
                .send(Command {
                    client_id: Uuid::new_v4(),
                    message: ClientMessage::Ping { timestamp },
                    reply: reply_tx.clone(),
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        while feed_rx.try_recv().is_ok() {}

        let mut snapshots = 0;
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                msg = feed_rx.recv() => {
                    if let Ok(ServerMessage::Snapshot(_)) = msg {
                        snapshots += 1;
                    }
                }
            }
        }
        assert!(snapshots > 5, "only {snapshots} snapshots in 500ms");

        shutdown_tx.send(()).unwrap();
        let session = tokio::time::timeout(Duration::from_secs(10), driver)
            .await
            .expect("driver did not stop")
            .unwrap();
        assert_eq!(session.stage(), &SessionStage::Closed);
    }

    #[tokio::test]
    async fn test_rejected_connection_told_server_overloaded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepting = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            reject_connection(stream, peer).await;
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let first = ws.next().await.unwrap().unwrap();
        let Message::Text(text) = first else {
            panic!("expected text frame, got {first:?}");
        };
        assert!(matches!(
            ServerMessage::from_json(&text).unwrap(),
            ServerMessage::Error(e) if e.code == ErrorCode::ServerOverloaded
        ));
        accepting.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_run_twice_fails() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = Arc::new(GameServer::new(config, session("good")));
        assert_eq!(server.connection_count().await, 0);

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(server.run().await, Err(GameServerError::AlreadyRunning)));

        server.shutdown();
        running.await.unwrap().unwrap();
    }
}
