//! Round Events
//!
//! Events produced by the scheduler, in the order they happened. The session
//! turns them into notifications and settlement reports; the feed server
//! forwards them to clients.

use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::game::ledger::Settlement;
use crate::game::state::RoundPhase;

/// Round event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEventData {
    /// Phase changed.
    PhaseChanged {
        /// Phase left.
        from: RoundPhase,
        /// Phase entered.
        to: RoundPhase,
    },

    /// Betting countdown decremented.
    CountdownTick {
        /// Seconds remaining after the decrement.
        seconds_left: u32,
    },

    /// Betting is about to close.
    BettingClosingSoon {
        /// Seconds remaining.
        seconds_left: u32,
    },

    /// Stake debited.
    BetPlaced {
        /// Stake amount.
        amount: f64,
        /// Placed by the auto-bet policy.
        automatic: bool,
    },

    /// Player locked in the multiplier.
    CashedOut {
        /// Multiplier at cash-out.
        multiplier: f64,
        /// Amount credited.
        win_amount: f64,
    },

    /// Round crashed.
    Crashed {
        /// Crash point drawn for the round.
        crash_point: f64,
        /// Multiplier shown at the crash.
        multiplier: f64,
        /// Player had a stake riding.
        had_bet: bool,
    },

    /// A staked round settled and must be reported.
    Settled(Settlement),

    /// Auto-bet switched.
    AutoBetToggled {
        /// New state.
        enabled: bool,
    },
}

/// An event with timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    /// Session clock in milliseconds.
    pub at_ms: u64,
    /// Round counter.
    pub round: u64,
    /// Event data.
    pub data: RoundEventData,
}

impl RoundEvent {
    /// Create a new event.
    pub fn new(at: Duration, round: u64, data: RoundEventData) -> Self {
        Self {
            at_ms: at.as_millis() as u64,
            round,
            data,
        }
    }

    /// Settlement carried by this event, if any.
    pub fn settlement(&self) -> Option<&Settlement> {
        match &self.data {
            RoundEventData::Settled(settlement) => Some(settlement),
            _ => None,
        }
    }

    /// True for phase transitions into `phase`.
    pub fn enters(&self, phase: RoundPhase) -> bool {
        matches!(self.data, RoundEventData::PhaseChanged { to, .. } if to == phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameResult;

    #[test]
    fn test_event_timing() {
        let event = RoundEvent::new(
            Duration::from_millis(12_345),
            3,
            RoundEventData::CountdownTick { seconds_left: 4 },
        );
        assert_eq!(event.at_ms, 12_345);
        assert_eq!(event.round, 3);
        assert!(event.settlement().is_none());
    }

    #[test]
    fn test_enters() {
        let event = RoundEvent::new(
            Duration::ZERO,
            1,
            RoundEventData::PhaseChanged {
                from: RoundPhase::Betting,
                to: RoundPhase::Flying,
            },
        );
        assert!(event.enters(RoundPhase::Flying));
        assert!(!event.enters(RoundPhase::Crashed));
    }

    #[test]
    fn test_event_serialization() {
        let settlement = Settlement {
            round: 2,
            status: GameResult::Win,
            win_amount: 150.0,
            loss_amount: 0.0,
            multiplier: 1.5,
            bet_amount: 100.0,
        };
        let event = RoundEvent::new(Duration::from_secs(1), 2, RoundEventData::Settled(settlement));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"settled\""));
        assert!(json.contains("\"status\":\"win\""));

        let back: RoundEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.settlement(), Some(&settlement));
    }
}
