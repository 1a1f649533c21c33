//! Round Scheduler
//!
//! The authoritative phase state machine: Betting -> Flying -> Crashed -> Betting.
//!
//! Time only moves through [`RoundScheduler::tick`]. Every timer (betting
//! countdown, flight end, auto-restart, auto-bet) is a deadline on the
//! session clock owned by the scheduler; `tick(now)` fires every deadline
//! that has come due, in chronological order, then advances the flight to
//! `now`. Player commands run a `tick` first, so a cash-out issued at or
//! after the crash instant always loses to the crash.

use std::time::Duration;

use tracing::debug;

use crate::core::curve;
use crate::core::rng::RandomSource;
use crate::core::sampler;
use crate::game::autobet::AutoBetController;
use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::ledger::{BetRejection, Settlement, WagerLedger, MIN_BET};
use crate::game::state::{
    FlightPoint, PlanePosition, RoundPhase, RoundSnapshot, RoundState,
};

/// Timing and sizing of rounds.
#[derive(Clone, Debug)]
pub struct RoundConfig {
    /// Length of the betting countdown in ticks.
    pub betting_seconds: u32,
    /// Countdown value at which a closing warning is emitted.
    pub warning_seconds: u32,
    /// Cadence of the betting countdown.
    pub countdown_interval: Duration,
    /// Delay between a crash and the next betting phase.
    pub restart_delay: Duration,
    /// Delay between betting opening and an automatic bet.
    pub auto_bet_delay: Duration,
    /// Maximum trail points kept for rendering.
    pub flight_path_capacity: usize,
    /// Smallest accepted bet.
    pub min_bet: f64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_seconds: 10,
            warning_seconds: 5,
            countdown_interval: Duration::from_secs(1),
            restart_delay: Duration::from_secs(3),
            auto_bet_delay: Duration::from_secs(2),
            flight_path_capacity: 200,
            min_bet: MIN_BET,
        }
    }
}

impl RoundConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            betting_seconds: env_parse("CRASH_BETTING_SECONDS").unwrap_or(defaults.betting_seconds),
            warning_seconds: env_parse("CRASH_WARNING_SECONDS").unwrap_or(defaults.warning_seconds),
            countdown_interval: defaults.countdown_interval,
            restart_delay: env_parse("CRASH_RESTART_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.restart_delay),
            auto_bet_delay: env_parse("CRASH_AUTO_BET_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.auto_bet_delay),
            flight_path_capacity: env_parse("CRASH_FLIGHT_PATH_CAPACITY")
                .unwrap_or(defaults.flight_path_capacity),
            min_bet: defaults.min_bet,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Deadlines, in firing priority order for equal instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timer {
    AutoBet,
    Countdown,
    FlightEnd,
    Restart,
}

#[derive(Clone, Debug, Default)]
struct Timers {
    countdown: Option<Duration>,
    restart: Option<Duration>,
}

/// Phase state machine for one session.
pub struct RoundScheduler {
    config: RoundConfig,
    state: RoundState,
    ledger: WagerLedger,
    auto_bet: AutoBetController,
    rng: Box<dyn RandomSource + Send>,
    timers: Timers,
    now: Duration,
    events: Vec<RoundEvent>,
    halted: bool,
}

impl RoundScheduler {
    /// Create a scheduler and open the first betting phase at `now`.
    pub fn new(
        config: RoundConfig,
        ledger: WagerLedger,
        rng: impl RandomSource + Send + 'static,
        now: Duration,
    ) -> Self {
        let mut scheduler = Self {
            state: RoundState::new(config.flight_path_capacity),
            auto_bet: AutoBetController::new(config.auto_bet_delay),
            config,
            ledger,
            rng: Box::new(rng),
            timers: Timers::default(),
            now,
            events: Vec::new(),
            halted: false,
        };
        scheduler.enter_betting(now);
        scheduler
    }

    /// Round state.
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Wager ledger.
    pub fn ledger(&self) -> &WagerLedger {
        &self.ledger
    }

    /// Round configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.state.phase
    }

    /// Latest clock value seen.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Auto-bet enabled.
    pub fn auto_bet_enabled(&self) -> bool {
        self.auto_bet.is_enabled()
    }

    /// True after [`RoundScheduler::shutdown`].
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Take the events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<RoundEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Clock
    // =========================================================================

    /// Advance the session clock to `now`.
    ///
    /// Fires every due deadline in time order, then samples the flight at
    /// `now`. A clock value older than the last one seen is treated as the
    /// last one.
    pub fn tick(&mut self, now: Duration) {
        if self.halted {
            return;
        }
        let now = now.max(self.now);

        while let Some((due, timer)) = self.next_due() {
            if due > now {
                break;
            }
            self.now = due;
            self.fire(timer, due);
        }

        self.now = now;
        if self.state.phase == RoundPhase::Flying {
            self.advance_flight(now);
        }
    }

    /// Drive the clock from the current time to `until` in `frame` steps.
    pub fn run_for(&mut self, until: Duration, frame: Duration) {
        let frame = frame.max(Duration::from_millis(1));
        let mut t = self.now;
        while t < until {
            t = (t + frame).min(until);
            self.tick(t);
        }
    }

    fn next_due(&self) -> Option<(Duration, Timer)> {
        [
            self.auto_bet.deadline().map(|t| (t, Timer::AutoBet)),
            self.timers.countdown.map(|t| (t, Timer::Countdown)),
            self.flight_end().map(|t| (t, Timer::FlightEnd)),
            self.timers.restart.map(|t| (t, Timer::Restart)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(t, _)| *t)
    }

    fn flight_end(&self) -> Option<Duration> {
        self.state
            .flight_started_at
            .map(|start| start + Duration::from_secs_f64(self.state.flight_duration))
    }

    fn fire(&mut self, timer: Timer, at: Duration) {
        match timer {
            Timer::AutoBet => {
                if self.auto_bet.poll(at) {
                    self.auto_place(at);
                }
            }
            Timer::Countdown => self.countdown_step(at),
            Timer::FlightEnd => {
                self.advance_flight(at);
                self.crash(at);
            }
            Timer::Restart => {
                self.timers.restart = None;
                self.enter_betting(at);
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Debit the bet amount for this round.
    pub fn place_bet(&mut self, now: Duration) -> Result<f64, BetRejection> {
        self.ensure_running()?;
        self.tick(now);

        let amount = self.ledger.place_bet(self.state.phase)?;
        self.auto_bet.cancel();
        self.push(self.now, RoundEventData::BetPlaced { amount, automatic: false });
        Ok(amount)
    }

    /// Lock in the multiplier at `now`. The round ends immediately.
    pub fn cash_out(&mut self, now: Duration) -> Result<Settlement, BetRejection> {
        self.ensure_running()?;
        self.tick(now);

        let settlement = self.ledger.cash_out(
            self.state.round,
            self.state.phase,
            self.state.current_multiplier,
        )?;

        let at = self.now;
        self.state.result_message = Some(format!(
            "Cashed out at {:.2}x! Won {:.2}",
            settlement.multiplier, settlement.win_amount
        ));
        self.push(at, RoundEventData::CashedOut {
            multiplier: settlement.multiplier,
            win_amount: settlement.win_amount,
        });
        self.push(at, RoundEventData::Settled(settlement));
        self.enter_crashed(at);
        Ok(settlement)
    }

    /// Skip the restart delay and open betting now.
    pub fn continue_round(&mut self, now: Duration) -> Result<(), BetRejection> {
        self.ensure_running()?;
        self.tick(now);

        if self.state.phase != RoundPhase::Crashed {
            return Err(BetRejection::WrongPhase(self.state.phase));
        }
        self.timers.restart = None;
        self.enter_betting(self.now);
        Ok(())
    }

    /// Set the bet amount. Returns the clamped value stored.
    pub fn update_bet_amount(&mut self, amount: f64) -> f64 {
        self.ledger.update_bet_amount(amount)
    }

    /// Switch auto-bet on or off.
    pub fn set_auto_bet(&mut self, enabled: bool, now: Duration) {
        if self.halted || enabled == self.auto_bet.is_enabled() {
            return;
        }
        self.tick(now);

        self.auto_bet.set_enabled(enabled);
        if enabled && self.state.phase == RoundPhase::Betting && self.ledger.can_bet() {
            self.auto_bet.arm(self.now);
        }
        self.push(self.now, RoundEventData::AutoBetToggled { enabled });
    }

    /// Flip auto-bet. Returns the new state.
    pub fn toggle_auto_bet(&mut self, now: Duration) -> bool {
        let enabled = !self.auto_bet.is_enabled();
        self.set_auto_bet(enabled, now);
        self.auto_bet.is_enabled()
    }

    /// Cancel every timer and stop accepting commands.
    pub fn shutdown(&mut self) {
        self.halted = true;
        self.timers = Timers::default();
        self.auto_bet.cancel();
        self.state.flight_started_at = None;
        debug!(round = self.state.round, "scheduler halted");
    }

    fn ensure_running(&self) -> Result<(), BetRejection> {
        if self.halted {
            Err(BetRejection::SessionClosed)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn enter_betting(&mut self, at: Duration) {
        let from = self.state.phase;

        self.state.round += 1;
        self.state.crash_point = sampler::sample_crash_point(self.rng.as_mut());
        self.state.flight_duration = sampler::sample_flight_duration(self.rng.as_mut());

        self.state.phase = RoundPhase::Betting;
        self.state.betting_time_left = self.config.betting_seconds;
        self.state.current_multiplier = 1.0;
        self.state.plane_position = PlanePosition::GROUNDED;
        self.state.flight_path.clear();
        self.state.progress = 0.0;
        self.state.flight_started_at = None;
        self.state.result_message = None;
        self.ledger.begin_round();

        self.timers.restart = None;
        self.timers.countdown = Some(at + self.config.countdown_interval);
        self.auto_bet.cancel();
        if self.ledger.can_bet() {
            self.auto_bet.arm(at);
        }

        debug!(
            round = self.state.round,
            crash_point = self.state.crash_point,
            flight_duration = self.state.flight_duration,
            "betting opened"
        );
        self.push(at, RoundEventData::PhaseChanged { from, to: RoundPhase::Betting });
    }

    fn countdown_step(&mut self, at: Duration) {
        self.state.betting_time_left = self.state.betting_time_left.saturating_sub(1);
        let seconds_left = self.state.betting_time_left;
        self.push(at, RoundEventData::CountdownTick { seconds_left });

        if seconds_left == 0 {
            self.timers.countdown = None;
            self.enter_flying(at);
            return;
        }

        if seconds_left == self.config.warning_seconds {
            self.push(at, RoundEventData::BettingClosingSoon { seconds_left });
        }
        self.timers.countdown = Some(at + self.config.countdown_interval);
    }

    fn auto_place(&mut self, at: Duration) {
        if self.state.phase != RoundPhase::Betting || !self.ledger.can_bet() {
            return;
        }
        match self.ledger.place_bet(self.state.phase) {
            Ok(amount) => {
                self.push(at, RoundEventData::BetPlaced { amount, automatic: true });
            }
            Err(rejection) => {
                debug!(round = self.state.round, %rejection, "auto-bet skipped");
            }
        }
    }

    fn enter_flying(&mut self, at: Duration) {
        let from = self.state.phase;
        let to = from.next();
        debug_assert_eq!(to, RoundPhase::Flying);

        self.timers.countdown = None;
        self.auto_bet.cancel();
        self.state.phase = to;
        self.state.flight_started_at = Some(at);
        self.state.current_multiplier = 1.0;

        debug!(round = self.state.round, "flight started");
        self.push(at, RoundEventData::PhaseChanged { from, to });
    }

    fn advance_flight(&mut self, now: Duration) {
        let elapsed = self.state.flight_elapsed(now);
        let sample = curve::sample(elapsed, self.state.flight_duration);

        self.state.current_multiplier = self.state.current_multiplier.max(sample.multiplier);
        self.state.plane_position = PlanePosition::from(&sample);
        self.state.flight_path.push(FlightPoint { x: sample.x, y: sample.y });
        self.state.progress = (sample.progress * 100.0).min(100.0);
    }

    /// Crash determination and loss settlement, applied as one step.
    fn crash(&mut self, at: Duration) {
        let round = self.state.round;
        let crash_point = self.state.crash_point;
        let multiplier = self.state.current_multiplier;
        let had_bet = self.ledger.has_placed_bet() && self.ledger.game_result().is_none();

        let loss_multiplier = if had_bet {
            sampler::sample_settlement_multiplier(self.rng.as_mut())
        } else {
            0
        };
        let settlement = self.ledger.settle_loss(round, crash_point, multiplier, loss_multiplier);

        self.state.result_message = Some(match &settlement {
            Some(s) => format!("Crashed at {:.2}x! Lost {:.2}", multiplier, s.loss_amount),
            None => format!("Crashed at {:.2}x!", multiplier),
        });

        self.push(at, RoundEventData::Crashed { crash_point, multiplier, had_bet });
        if let Some(settlement) = settlement {
            self.push(at, RoundEventData::Settled(settlement));
        }
        self.enter_crashed(at);
    }

    fn enter_crashed(&mut self, at: Duration) {
        let from = self.state.phase;
        let to = from.next();
        debug_assert_eq!(to, RoundPhase::Crashed);

        self.state.phase = to;
        self.state.flight_started_at = None;
        self.timers.countdown = None;
        self.auto_bet.cancel();
        self.timers.restart = Some(at + self.config.restart_delay);

        debug!(round = self.state.round, "round crashed");
        self.push(at, RoundEventData::PhaseChanged { from, to });
    }

    fn push(&mut self, at: Duration, data: RoundEventData) {
        self.events.push(RoundEvent::new(at, self.state.round, data));
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Read-only view for presentation.
    pub fn snapshot(&self) -> RoundSnapshot {
        let phase = self.state.phase;
        RoundSnapshot {
            round: self.state.round,
            phase,
            betting_time_left: self.state.betting_time_left,
            current_multiplier: self.state.current_multiplier,
            plane_position: self.state.plane_position,
            flight_path: self.state.flight_path.to_vec(),
            progress: self.state.progress,
            crash_point: (phase == RoundPhase::Crashed).then_some(self.state.crash_point),
            balance: self.ledger.balance(),
            bet_amount: self.ledger.bet_amount(),
            has_placed_bet: self.ledger.has_placed_bet(),
            can_bet: !self.halted && phase == RoundPhase::Betting && self.ledger.can_bet(),
            auto_bet: self.auto_bet.is_enabled(),
            game_result: self.ledger.game_result(),
            win_multiplier: self.ledger.win_multiplier(),
            loss_multiplier: self.ledger.loss_multiplier(),
            result_message: self.state.result_message.clone(),
            history: self.ledger.history_multipliers(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
