//! Settlement Service Gateway
//!
//! Request/response contract with the wallet service: verify a session token
//! before play, report each staked round after it settles.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::game::ledger::Settlement;
use crate::game::state::GameResult;
use crate::network::auth::Credentials;
use crate::DEFAULT_BET_AMOUNT;

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL of the settlement service.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("CRASH_API_BASE_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("CRASH_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Service answered with a non-success status.
    #[error("service returned {status}: {message}")]
    Status {
        /// HTTP status.
        status: StatusCode,
        /// Message from the body, or the status reason.
        message: String,
    },
    /// Service answered `success: false`.
    #[error("{0}")]
    Rejected(String),
    /// Body did not match the contract.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Base URL cannot carry path segments.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl GatewayError {
    /// Message suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Rejected(message) => message.clone(),
            GatewayError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Verified player data.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerProfile {
    /// Starting balance.
    pub balance: f64,
    /// Name shown in the welcome message.
    pub display_name: String,
    /// Bet amount to start with.
    pub default_bet_amount: f64,
}

/// Body of `GET /api/games/verify/{token}`.
#[derive(Clone, Debug, Deserialize)]
pub struct VerifyResponse {
    /// Verification outcome.
    pub success: bool,
    /// Player data on success.
    #[serde(default)]
    pub data: Option<VerifyData>,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

/// Player data returned by verification.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyData {
    /// Wallet balance.
    pub current_balance: f64,
    /// Display name.
    pub user_name: String,
    /// Preferred bet amount.
    #[serde(default)]
    pub bet_amount: Option<f64>,
}

impl VerifyResponse {
    /// Convert into a profile, or the rejection reason.
    pub fn into_profile(self) -> Result<PlayerProfile, GatewayError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(PlayerProfile {
                balance: data.current_balance,
                display_name: data.user_name,
                default_bet_amount: data
                    .bet_amount
                    .filter(|amount| *amount > 0.0)
                    .unwrap_or(DEFAULT_BET_AMOUNT),
            }),
            (_, _) => Err(GatewayError::Rejected(
                self.message.unwrap_or_else(|| "Token verification failed".into()),
            )),
        }
    }
}

/// Body of `POST /api/games/bet-result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetReport {
    /// Session token.
    pub session_token: String,
    /// `"win"` or `"loss"`.
    pub bet_status: GameResult,
    /// Amount credited on a win.
    pub win_amount: f64,
    /// Stake lost on a loss.
    pub loss_amount: f64,
    /// Game session identifier.
    pub game_session_id: String,
    /// Multiplier at settlement.
    pub multiplier: f64,
    /// Stake.
    pub bet_amount: f64,
}

impl BetReport {
    /// Build a report, or `None` if the token or session id is missing.
    pub fn new(settlement: &Settlement, credentials: &Credentials) -> Option<Self> {
        Some(Self {
            session_token: credentials.token.clone()?,
            bet_status: settlement.status,
            win_amount: settlement.win_amount,
            loss_amount: settlement.loss_amount,
            game_session_id: credentials.session_id.clone()?,
            multiplier: settlement.multiplier,
            bet_amount: settlement.bet_amount,
        })
    }
}

/// Body of the bet-result response.
#[derive(Clone, Debug, Deserialize)]
pub struct ReportResponse {
    /// Report accepted.
    pub success: bool,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Settlement service contract.
pub trait SessionGateway: Send + Sync + 'static {
    /// Verify a session token.
    fn verify(&self, token: &str) -> impl Future<Output = Result<PlayerProfile, GatewayError>> + Send;

    /// Report a settled round.
    fn report_result(&self, report: BetReport) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// HTTP implementation of [`SessionGateway`].
#[derive(Clone, Debug)]
pub struct HttpGateway {
    base_url: Url,
    http: Client,
}

impl HttpGateway {
    /// Create a gateway for `config.base_url`.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidBaseUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidBaseUrl(config.base_url.clone()));
        }
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { base_url, http })
    }

    /// Base URL requests are made against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/api/games/verify/{token}` with the token percent-encoded.
    pub fn verify_url(&self, token: &str) -> Result<Url, GatewayError> {
        self.endpoint(&["api", "games", "verify", token])
    }

    /// `{base}/api/games/bet-result`.
    pub fn report_url(&self) -> Result<Url, GatewayError> {
        self.endpoint(&["api", "games", "bet-result"])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Read a response body, mapping non-success statuses to [`GatewayError::Status`].
async fn read_body(response: reqwest::Response) -> Result<String, GatewayError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(GatewayError::Status { status, message })
}

impl SessionGateway for HttpGateway {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<PlayerProfile, GatewayError> {
        let url = self.verify_url(token)?;
        let response = self.http.get(url).send().await?;
        let body = read_body(response).await?;

        let profile = serde_json::from_str::<VerifyResponse>(&body)?.into_profile()?;
        debug!(balance = profile.balance, "session verified");
        Ok(profile)
    }

    #[instrument(skip_all, fields(status = ?report.bet_status))]
    async fn report_result(&self, report: BetReport) -> Result<(), GatewayError> {
        let url = self.report_url()?;
        let response = self.http.post(url).json(&report).send().await?;
        let body = read_body(response).await?;

        let parsed: ReportResponse = serde_json::from_str(&body)?;
        if !parsed.success {
            return Err(GatewayError::Rejected(
                parsed.message.unwrap_or_else(|| "Failed to send bet result".into()),
            ));
        }
        debug!("bet result accepted");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
