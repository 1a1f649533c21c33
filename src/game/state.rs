//! Round State Definitions
//!
//! All state types for round simulation.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::curve::FlightSample;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Phase of the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum RoundPhase {
    /// Countdown running, bets accepted.
    #[default]
    Betting,
    /// Multiplier growing, cash-out accepted.
    Flying,
    /// Round over, waiting for restart.
    Crashed,
}

impl RoundPhase {
    /// Phase that follows this one.
    pub fn next(self) -> RoundPhase {
        match self {
            RoundPhase::Betting => RoundPhase::Flying,
            RoundPhase::Flying => RoundPhase::Crashed,
            RoundPhase::Crashed => RoundPhase::Betting,
        }
    }
}

/// Outcome of a staked round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    /// Cashed out before the crash.
    Win,
    /// Still in the air when the round crashed.
    Loss,
}

// =============================================================================
// FLIGHT PATH
// =============================================================================

/// Position and heading of the plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanePosition {
    /// Horizontal position (0-100).
    pub x: f64,
    /// Vertical position (15-85).
    pub y: f64,
    /// Heading in degrees.
    pub angle: f64,
}

impl PlanePosition {
    /// Resting position shown during betting.
    pub const GROUNDED: PlanePosition = PlanePosition { x: 0.0, y: 50.0, angle: 0.0 };
}

impl Default for PlanePosition {
    fn default() -> Self {
        Self::GROUNDED
    }
}

impl From<&FlightSample> for PlanePosition {
    fn from(sample: &FlightSample) -> Self {
        Self {
            x: sample.x,
            y: sample.y,
            angle: sample.angle,
        }
    }
}

/// A point of the trail drawn behind the plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightPoint {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

/// Bounded trail of recent positions. The oldest point is dropped when full.
#[derive(Clone, Debug)]
pub struct FlightPath {
    points: VecDeque<FlightPoint>,
    capacity: usize,
}

impl FlightPath {
    /// Create an empty path holding at most `capacity` points.
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest if full.
    pub fn push(&mut self, point: FlightPoint) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Remove all points.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Number of points held.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if no points are held.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy of the points, oldest first.
    pub fn to_vec(&self) -> Vec<FlightPoint> {
        self.points.iter().copied().collect()
    }
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// Per-session round state owned by the scheduler.
///
/// Balance, stake and history live in the wager ledger.
#[derive(Clone, Debug)]
pub struct RoundState {
    /// Round counter, starting at 1.
    pub round: u64,
    /// Current phase.
    pub phase: RoundPhase,
    /// Whole seconds left in the betting countdown.
    pub betting_time_left: u32,
    /// Crash point drawn at betting entry. Hidden until the round crashes.
    pub crash_point: f64,
    /// Flight length in seconds drawn at betting entry.
    pub flight_duration: f64,
    /// Multiplier shown right now.
    pub current_multiplier: f64,
    /// Plane position from the latest frame.
    pub plane_position: PlanePosition,
    /// Recent trail.
    pub flight_path: FlightPath,
    /// Flight completion in percent (0-100).
    pub progress: f64,
    /// Clock offset at which the flight started. `None` outside `Flying`.
    pub flight_started_at: Option<Duration>,
    /// Summary of the concluded round.
    pub result_message: Option<String>,
}

impl RoundState {
    /// Create state for a session. The first round has not begun yet.
    pub fn new(flight_path_capacity: usize) -> Self {
        Self {
            round: 0,
            phase: RoundPhase::Betting,
            betting_time_left: 0,
            crash_point: 1.0,
            flight_duration: 0.0,
            current_multiplier: 1.0,
            plane_position: PlanePosition::GROUNDED,
            flight_path: FlightPath::new(flight_path_capacity),
            progress: 0.0,
            flight_started_at: None,
            result_message: None,
        }
    }

    /// Seconds since the flight started, or zero outside `Flying`.
    pub fn flight_elapsed(&self, now: Duration) -> f64 {
        self.flight_started_at
            .map(|start| now.saturating_sub(start).as_secs_f64())
            .unwrap_or(0.0)
    }
}

// =============================================================================
// HISTORY
// =============================================================================

/// One settled round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round counter.
    pub round: u64,
    /// Settled multiplier: the cash-out multiplier on a win, the crash point otherwise.
    pub multiplier: f64,
    /// Outcome, `None` when no bet was placed.
    pub result: Option<GameResult>,
    /// Wall-clock settlement time.
    pub settled_at: DateTime<Utc>,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Read-only view of a round for presentation collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round counter.
    pub round: u64,
    /// Current phase.
    pub phase: RoundPhase,
    /// Countdown seconds left.
    pub betting_time_left: u32,
    /// Multiplier shown right now.
    pub current_multiplier: f64,
    /// Plane position.
    pub plane_position: PlanePosition,
    /// Recent trail.
    pub flight_path: Vec<FlightPoint>,
    /// Flight completion in percent.
    pub progress: f64,
    /// Crash point, revealed only once the round has crashed.
    pub crash_point: Option<f64>,
    /// Player balance.
    pub balance: f64,
    /// Configured bet amount.
    pub bet_amount: f64,
    /// A bet is placed this round.
    pub has_placed_bet: bool,
    /// A bet could be placed right now.
    pub can_bet: bool,
    /// Auto-bet enabled.
    pub auto_bet: bool,
    /// Outcome of the concluded round.
    pub game_result: Option<GameResult>,
    /// Cash-out multiplier of the concluded round, 0 if none.
    pub win_multiplier: f64,
    /// Display multiplier of a lost round, 0 if none.
    pub loss_multiplier: u32,
    /// Summary of the concluded round.
    pub result_message: Option<String>,
    /// Settled multipliers, most recent last.
    pub history: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cycle() {
        let mut phase = RoundPhase::default();
        assert_eq!(phase, RoundPhase::Betting);
        phase = phase.next();
        assert_eq!(phase, RoundPhase::Flying);
        phase = phase.next();
        assert_eq!(phase, RoundPhase::Crashed);
        assert_eq!(phase.next(), RoundPhase::Betting);
    }

    #[test]
    fn test_flight_path_drops_oldest() {
        let mut path = FlightPath::new(200);
        for i in 0..250 {
            path.push(FlightPoint { x: i as f64, y: 50.0 });
        }
        assert_eq!(path.len(), 200);
        let points = path.to_vec();
        assert_eq!(points[0].x, 50.0);
        assert_eq!(points[199].x, 249.0);

        path.clear();
        assert!(path.is_empty());
    }

    #[test]
    fn test_zero_capacity_path() {
        let mut path = FlightPath::new(0);
        path.push(FlightPoint { x: 1.0, y: 1.0 });
        assert!(path.is_empty());
    }

    #[test]
    fn test_flight_elapsed() {
        let mut state = RoundState::new(10);
        assert_eq!(state.flight_elapsed(Duration::from_secs(5)), 0.0);

        state.flight_started_at = Some(Duration::from_secs(10));
        assert_eq!(state.flight_elapsed(Duration::from_millis(12_500)), 2.5);
        assert_eq!(state.flight_elapsed(Duration::from_secs(9)), 0.0);
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&RoundPhase::Flying).unwrap();
        assert_eq!(json, "\"flying\"");
        let json = serde_json::to_string(&GameResult::Loss).unwrap();
        assert_eq!(json, "\"loss\"");
    }
}
