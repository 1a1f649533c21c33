//! Crash Round Server
//!
//! Verifies the player's session, runs rounds, and serves the WebSocket
//! feed until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crash_round::{
    FRAME_RATE, VERSION,
    game::scheduler::RoundConfig,
    network::{
        auth::Credentials,
        gateway::{GatewayConfig, HttpGateway},
        server::{GameServer, ServerConfig},
        session::{session_seed, GameSession},
    },
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "crash_round=debug,info";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Crash Round Server v{}", VERSION);
    info!("Frame Rate: {} Hz", FRAME_RATE);

    let credentials = match std::env::var("CRASH_LAUNCH_URL") {
        Ok(url) => Credentials::from_query(&url).context("parsing CRASH_LAUNCH_URL")?,
        Err(_) => Credentials::from_env(),
    };
    if credentials.require_token().is_err() {
        bail!("no session token: set SESSION_TOKEN or pass ?token= in CRASH_LAUNCH_URL");
    }
    if !credentials.is_complete() {
        warn!("no session id: bet results will not be reported");
    }

    let round_config = RoundConfig::from_env();
    let gateway_config = GatewayConfig::from_env();
    let server_config = ServerConfig::from_env();

    let gateway = HttpGateway::new(&gateway_config).context("building settlement gateway")?;
    info!("Settlement service: {}", gateway.base_url());

    let seed = session_seed(&credentials, server_config.rng_seed);
    info!(
        "Session {} (token {}), seed {}",
        credentials.session_id.as_deref().unwrap_or("-"),
        credentials.fingerprint().unwrap_or_default(),
        seed
    );

    let session = GameSession::new(Arc::new(gateway), credentials, round_config, seed);
    let server = Arc::new(GameServer::new(server_config, session));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("feed server failed")?;
    info!("Shutdown complete");
    Ok(())
}
