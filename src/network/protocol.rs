//! Protocol Messages
//!
//! Wire format for the feed WebSocket. All messages are JSON text frames.

use serde::{Serialize, Deserialize};

use crate::game::events::RoundEvent;
use crate::network::session::SessionSnapshot;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Verify the session and begin rounds.
    Start,

    /// Place a bet for the current round.
    PlaceBet,

    /// Cash out the current bet.
    CashOut,

    /// Skip the restart delay.
    Continue,

    /// Change the bet amount.
    SetBetAmount { amount: f64 },

    /// Flip auto-bet.
    ToggleAutoBet,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

impl ClientMessage {
    /// Short name for logs and acknowledgements.
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Start => "start",
            ClientMessage::PlaceBet => "place_bet",
            ClientMessage::CashOut => "cash_out",
            ClientMessage::Continue => "continue",
            ClientMessage::SetBetAmount { .. } => "set_bet_amount",
            ClientMessage::ToggleAutoBet => "toggle_auto_bet",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is accepted.
    Hello {
        /// Connection identifier.
        client_id: String,
        /// Server version.
        server_version: String,
    },

    /// Session state (every frame).
    Snapshot(SessionSnapshot),

    /// Round event notification.
    Event(RoundEvent),

    /// Command applied.
    Ack { command: String },

    /// Command refused by the round.
    Rejected { command: String, reason: String },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame was not a valid client message.
    InvalidMessage,
    /// No session token.
    MissingToken,
    /// Session verification failed.
    VerificationFailed,
    /// Rounds have not started.
    NotStarted,
    /// Session torn down.
    SessionClosed,
    /// Too many connections.
    ServerOverloaded,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::RoundEventData;
    use crate::network::session::SessionStage;
    use std::time::Duration;

    #[test]
    fn test_client_message_wire_names() {
        let cases = [
            (r#"{"type":"start"}"#, ClientMessage::Start),
            (r#"{"type":"place_bet"}"#, ClientMessage::PlaceBet),
            (r#"{"type":"cash_out"}"#, ClientMessage::CashOut),
            (r#"{"type":"continue"}"#, ClientMessage::Continue),
            (r#"{"type":"toggle_auto_bet"}"#, ClientMessage::ToggleAutoBet),
            (
                r#"{"type":"set_bet_amount","amount":25.5}"#,
                ClientMessage::SetBetAmount { amount: 25.5 },
            ),
        ];
        for (json, expected) in cases {
            let parsed = ClientMessage::from_json(json).unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.name(), json.split('"').nth(3).unwrap());
        }
    }

    #[test]
    fn test_unknown_client_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"fly_away"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_snapshot_message() {
        let msg = ServerMessage::Snapshot(SessionSnapshot {
            stage: SessionStage::PreGame { last_error: None },
            player_name: None,
            round: None,
            notification: None,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"snapshot\""));
        assert!(json.contains("\"stage\":\"pre_game\""));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_event_message() {
        let msg = ServerMessage::Event(RoundEvent::new(
            Duration::from_secs(3),
            1,
            RoundEventData::CountdownTick { seconds_left: 7 },
        ));
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"kind\":\"countdown_tick\""));
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::VerificationFailed, "Invalid token");
        let json = msg.to_json().unwrap();
        assert!(json.contains("verification_failed"));
    }
}
