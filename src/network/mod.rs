//! Network Layer
//!
//! Settlement service gateway, session lifecycle and the WebSocket feed.
//! This layer is **non-deterministic** - all round logic runs through `game/`.

pub mod auth;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{Credentials, CredentialsError};
pub use gateway::{
    BetReport, GatewayConfig, GatewayError, HttpGateway, PlayerProfile, SessionGateway,
};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode};
pub use session::{GameSession, SessionError, SessionSnapshot, SessionStage};
pub use server::{GameServer, ServerConfig, GameServerError};
