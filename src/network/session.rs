//! Game Session
//!
//! One player's session: verification against the settlement service, the
//! round scheduler once verified, notifications, and fire-and-forget
//! settlement reports. Gateway failures are turned into notifications here
//! and never reach the scheduler.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::rng::{derive_session_seed, DeterministicRng, RandomSource};
use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::ledger::{BetRejection, Settlement, WagerLedger};
use crate::game::notify::{notification_for, Notification, NotificationBus};
use crate::game::scheduler::{RoundConfig, RoundScheduler};
use crate::game::state::{RoundPhase, RoundSnapshot};
use crate::network::auth::Credentials;
use crate::network::gateway::{BetReport, GatewayError, PlayerProfile, SessionGateway};

/// Events kept for the feed between drains.
const MAX_OUTBOX: usize = 1024;

const MISSING_TOKEN_TEXT: &str = "No token provided. Please provide a valid session token to play.";
const VERIFY_FAILED_TEXT: &str =
    "Session verification failed. Please refresh the page with a valid token.";

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SessionStage {
    /// Not verified yet. `start` may be retried.
    PreGame {
        /// Reason the last start attempt failed.
        last_error: Option<String>,
    },
    /// Verified, rounds running.
    Playing,
    /// Torn down.
    Closed,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session token was supplied.
    #[error("missing session token")]
    MissingToken,

    /// The settlement service refused or could not verify the token.
    #[error("verification failed: {0}")]
    Verification(#[from] GatewayError),

    /// Rounds have not started.
    #[error("session not started")]
    NotStarted,

    /// Rounds are already running.
    #[error("session already started")]
    AlreadyStarted,

    /// The session has been torn down.
    #[error("session closed")]
    Closed,

    /// The round refused the command.
    #[error("rejected: {0}")]
    Rejected(#[from] BetRejection),
}

/// Outcome of a settlement report task.
#[derive(Debug)]
struct ReportOutcome {
    round: u64,
    result: Result<(), String>,
}

/// Read-only view of the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Lifecycle stage.
    pub stage: SessionStage,
    /// Verified player name.
    pub player_name: Option<String>,
    /// Round view once playing.
    pub round: Option<RoundSnapshot>,
    /// Message on screen.
    pub notification: Option<Notification>,
}

/// Seed for a session's rounds: the override if given, otherwise derived
/// from the session id and the current time.
pub fn session_seed(credentials: &Credentials, seed_override: Option<u64>) -> u64 {
    seed_override.unwrap_or_else(|| {
        let session_id = credentials.session_id.as_deref().unwrap_or("anonymous");
        derive_session_seed(session_id, Utc::now().timestamp_millis() as u64)
    })
}

/// A single player's game session.
pub struct GameSession<G: SessionGateway> {
    gateway: Arc<G>,
    credentials: Credentials,
    config: RoundConfig,
    seed: u64,
    random_source: Option<Box<dyn RandomSource + Send>>,
    stage: SessionStage,
    profile: Option<PlayerProfile>,
    scheduler: Option<RoundScheduler>,
    notifications: NotificationBus,
    outbox: VecDeque<RoundEvent>,
    report_tx: mpsc::UnboundedSender<ReportOutcome>,
    report_rx: mpsc::UnboundedReceiver<ReportOutcome>,
    pending_reports: usize,
}

impl<G: SessionGateway> GameSession<G> {
    /// Create a session in the pre-game stage.
    pub fn new(gateway: Arc<G>, credentials: Credentials, config: RoundConfig, seed: u64) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            gateway,
            credentials,
            config,
            seed,
            random_source: None,
            stage: SessionStage::PreGame { last_error: None },
            profile: None,
            scheduler: None,
            notifications: NotificationBus::new(),
            outbox: VecDeque::new(),
            report_tx,
            report_rx,
            pending_reports: 0,
        }
    }

    /// Use `source` instead of the seeded generator for round draws.
    pub fn with_random_source(mut self, source: impl RandomSource + Send + 'static) -> Self {
        self.random_source = Some(Box::new(source));
        self
    }

    /// Lifecycle stage.
    pub fn stage(&self) -> &SessionStage {
        &self.stage
    }

    /// Seed the round generator is built from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Verified player, once playing.
    pub fn profile(&self) -> Option<&PlayerProfile> {
        self.profile.as_ref()
    }

    /// Round scheduler, once playing.
    pub fn scheduler(&self) -> Option<&RoundScheduler> {
        self.scheduler.as_ref()
    }

    /// Settlement reports still in flight.
    pub fn pending_reports(&self) -> usize {
        self.pending_reports
    }

    /// Message on screen at `now`.
    pub fn notification(&self, now: Duration) -> Option<&Notification> {
        self.notifications.active(now)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Verify the session and open the first betting phase.
    ///
    /// On failure the session stays in the pre-game stage and `start` may be
    /// called again.
    pub async fn start(&mut self, now: Duration) -> Result<(), SessionError> {
        match self.stage {
            SessionStage::Playing => return Err(SessionError::AlreadyStarted),
            SessionStage::Closed => return Err(SessionError::Closed),
            SessionStage::PreGame { .. } => {}
        }

        let token = match self.credentials.require_token() {
            Ok(token) => token.to_string(),
            Err(_) => {
                warn!("start refused: no session token");
                self.notifications.post(MISSING_TOKEN_TEXT, Duration::from_secs(5), now);
                self.stage = SessionStage::PreGame {
                    last_error: Some(MISSING_TOKEN_TEXT.into()),
                };
                return Err(SessionError::MissingToken);
            }
        };

        info!(token = ?self.credentials.fingerprint(), "verifying session");
        self.notifications.post("Verifying your session...", Duration::from_secs(2), now);

        let gateway = Arc::clone(&self.gateway);
        let profile = match gateway.verify(&token).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "session verification failed");
                self.notifications.post(
                    format!("Error: {}", e.user_message()),
                    Duration::from_secs(4),
                    now,
                );
                self.notifications.post_next(VERIFY_FAILED_TEXT, Duration::from_secs(5), now);
                self.stage = SessionStage::PreGame {
                    last_error: Some(e.user_message()),
                };
                return Err(SessionError::Verification(e));
            }
        };

        info!(
            player = %profile.display_name,
            balance = profile.balance,
            bet_amount = profile.default_bet_amount,
            seed = self.seed,
            "session verified"
        );

        let ledger = WagerLedger::with_min_bet(
            profile.balance,
            profile.default_bet_amount,
            self.config.min_bet,
        );
        let rng = self
            .random_source
            .take()
            .unwrap_or_else(|| Box::new(DeterministicRng::new(self.seed)));
        self.scheduler = Some(RoundScheduler::new(self.config.clone(), ledger, rng, now));
        self.stage = SessionStage::Playing;
        self.process_events();

        self.notifications.post(
            format!("Session verified! Welcome back, {}!", profile.display_name),
            Duration::from_secs(3),
            now,
        );
        self.profile = Some(profile);
        Ok(())
    }

    /// Cancel every timer. Reports already in flight still complete.
    pub fn teardown(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.shutdown();
        }
        self.process_events();
        self.notifications.clear();
        self.stage = SessionStage::Closed;
        info!(pending_reports = self.pending_reports, "session torn down");
    }

    // =========================================================================
    // Clock and commands
    // =========================================================================

    /// Advance the session clock.
    pub fn tick(&mut self, now: Duration) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.tick(now);
        }
        self.process_events();
        self.poll_reports(now);
        self.notifications.expire(now);
    }

    /// Place a bet for the current round.
    pub fn place_bet(&mut self, now: Duration) -> Result<f64, SessionError> {
        let result = self.playing()?.place_bet(now);
        self.process_events();
        Ok(result?)
    }

    /// Cash out the current bet.
    pub fn cash_out(&mut self, now: Duration) -> Result<Settlement, SessionError> {
        let result = self.playing()?.cash_out(now);
        self.process_events();
        Ok(result?)
    }

    /// Start the next round without waiting for the restart delay.
    pub fn continue_round(&mut self, now: Duration) -> Result<(), SessionError> {
        let result = self.playing()?.continue_round(now);
        self.process_events();
        Ok(result?)
    }

    /// Set the bet amount. Returns the clamped value.
    pub fn set_bet_amount(&mut self, amount: f64) -> Result<f64, SessionError> {
        Ok(self.playing()?.update_bet_amount(amount))
    }

    /// Flip auto-bet. Returns the new state.
    pub fn toggle_auto_bet(&mut self, now: Duration) -> Result<bool, SessionError> {
        let enabled = self.playing()?.toggle_auto_bet(now);
        self.process_events();
        Ok(enabled)
    }

    fn playing(&mut self) -> Result<&mut RoundScheduler, SessionError> {
        match self.stage {
            SessionStage::Closed => Err(SessionError::Closed),
            _ => self.scheduler.as_mut().ok_or(SessionError::NotStarted),
        }
    }

    // =========================================================================
    // Events and reports
    // =========================================================================

    fn process_events(&mut self) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        let events = scheduler.drain_events();

        for event in events {
            let at = Duration::from_millis(event.at_ms);
            log_event(&event);

            if let Some((text, ttl)) = notification_for(&event) {
                self.notifications.post(text, ttl, at);
            }
            if let Some(settlement) = event.settlement() {
                self.dispatch_report(settlement, at);
            }

            if self.outbox.len() == MAX_OUTBOX {
                self.outbox.pop_front();
            }
            self.outbox.push_back(event);
        }
    }

    fn dispatch_report(&mut self, settlement: &Settlement, at: Duration) {
        let Some(report) = BetReport::new(settlement, &self.credentials) else {
            warn!(round = settlement.round, "settlement not reported: missing token or session id");
            self.notifications.post("Missing token or session ID", Duration::from_secs(4), at);
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(round = settlement.round, "settlement not reported: no async runtime");
            self.notifications.post(
                "Failed to send bet result: no async runtime",
                Duration::from_secs(4),
                at,
            );
            return;
        }

        let gateway = Arc::clone(&self.gateway);
        let tx = self.report_tx.clone();
        let round = settlement.round;
        self.pending_reports += 1;

        tokio::spawn(async move {
            let result = gateway
                .report_result(report)
                .await
                .map_err(|e| e.user_message());
            let _ = tx.send(ReportOutcome { round, result });
        });
    }

    /// Handle reports that have completed.
    fn poll_reports(&mut self, now: Duration) {
        while let Ok(outcome) = self.report_rx.try_recv() {
            self.handle_report(outcome, now);
        }
    }

    /// Wait for every report in flight to complete.
    pub async fn flush_reports(&mut self, now: Duration) {
        while self.pending_reports > 0 {
            match self.report_rx.recv().await {
                Some(outcome) => self.handle_report(outcome, now),
                None => break,
            }
        }
    }

    fn handle_report(&mut self, outcome: ReportOutcome, now: Duration) {
        self.pending_reports = self.pending_reports.saturating_sub(1);
        match outcome.result {
            Ok(()) => debug!(round = outcome.round, "bet result reported"),
            Err(message) => {
                warn!(round = outcome.round, error = %message, "bet result report failed");
                self.notifications.post(
                    format!("Failed to send bet result: {}", message),
                    Duration::from_secs(4),
                    now,
                );
            }
        }
    }

    /// Take the round events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<RoundEvent> {
        self.outbox.drain(..).collect()
    }

    /// Read-only view at `now`.
    pub fn snapshot(&self, now: Duration) -> SessionSnapshot {
        SessionSnapshot {
            stage: self.stage.clone(),
            player_name: self.profile.as_ref().map(|p| p.display_name.clone()),
            round: self.scheduler.as_ref().map(RoundScheduler::snapshot),
            notification: self.notifications.active(now).cloned(),
        }
    }
}

fn log_event(event: &RoundEvent) {
    match &event.data {
        RoundEventData::Settled(s) => info!(
            round = event.round,
            status = ?s.status,
            multiplier = s.multiplier,
            win_amount = s.win_amount,
            loss_amount = s.loss_amount,
            "round settled"
        ),
        RoundEventData::Crashed { crash_point, had_bet, .. } => info!(
            round = event.round,
            crash_point,
            had_bet,
            "round crashed"
        ),
        RoundEventData::PhaseChanged { to: RoundPhase::Flying, .. } => {
            debug!(round = event.round, "flight started")
        }
        data => debug!(round = event.round, ?data, "round event"),
    }
}

// =============================================================================
// TESTS
// =============================================================================
