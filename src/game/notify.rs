//! Notification Bus
//!
//! Short-lived, user-facing messages. Purely cosmetic: nothing in the round
//! logic reads them back. A new message replaces the one on screen.

use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::state::{GameResult, RoundPhase};

/// A message with an expiry on the session clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Message text.
    pub text: String,
    /// Session clock offset at which the message disappears.
    #[serde(with = "millis")]
    pub expires_at: Duration,
}

/// Holds at most one active notification, plus one queued behind it.
#[derive(Clone, Debug, Default)]
pub struct NotificationBus {
    current: Option<Notification>,
    /// Start time and message shown once `current` expires.
    queued: Option<(Duration, Notification)>,
}

impl NotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `text` for `ttl`, replacing any active or queued message.
    pub fn post(&mut self, text: impl Into<String>, ttl: Duration, now: Duration) {
        self.queued = None;
        self.current = Some(Notification {
            text: text.into(),
            expires_at: now + ttl,
        });
    }

    /// Show `text` for `ttl` once the active message expires.
    pub fn post_next(&mut self, text: impl Into<String>, ttl: Duration, now: Duration) {
        let starts_at = self
            .current
            .as_ref()
            .map_or(now, |n| n.expires_at.max(now));
        self.queued = Some((
            starts_at,
            Notification {
                text: text.into(),
                expires_at: starts_at + ttl,
            },
        ));
    }

    /// Message visible at `now`.
    pub fn active(&self, now: Duration) -> Option<&Notification> {
        if let Some(current) = self.current.as_ref().filter(|n| now < n.expires_at) {
            return Some(current);
        }
        self.queued
            .as_ref()
            .filter(|(starts_at, n)| now >= *starts_at && now < n.expires_at)
            .map(|(_, n)| n)
    }

    /// Drop expired messages, promoting a queued one whose time has come.
    pub fn expire(&mut self, now: Duration) {
        if self.current.as_ref().is_some_and(|n| now >= n.expires_at) {
            self.current = None;
        }
        if self.current.is_none() && self.queued.as_ref().is_some_and(|(starts_at, _)| now >= *starts_at) {
            self.current = self.queued.take().map(|(_, n)| n);
            if self.current.as_ref().is_some_and(|n| now >= n.expires_at) {
                self.current = None;
            }
        }
    }

    /// Drop any message.
    pub fn clear(&mut self) {
        self.current = None;
        self.queued = None;
    }
}

/// Notification text and lifetime for a round event, if it warrants one.
pub fn notification_for(event: &RoundEvent) -> Option<(String, Duration)> {
    let (text, millis) = match &event.data {
        RoundEventData::PhaseChanged { to: RoundPhase::Betting, .. } => {
            ("New round starting! Place your bets!".to_string(), 2_000)
        }
        RoundEventData::PhaseChanged { to: RoundPhase::Flying, .. } => {
            ("Game starting! Watch the multiplier grow!".to_string(), 2_000)
        }
        RoundEventData::BettingClosingSoon { seconds_left } => {
            (format!("Only {seconds_left} seconds left to bet!"), 1_500)
        }
        RoundEventData::BetPlaced { amount, .. } => (format!("Bet placed: {amount:.2}"), 2_000),
        RoundEventData::CashedOut { win_amount, .. } => {
            (format!("CASHED OUT! +{win_amount:.2}"), 4_000)
        }
        RoundEventData::Crashed { had_bet: false, .. } => {
            ("CRASHED! No bet placed".to_string(), 4_000)
        }
        RoundEventData::Settled(s) if s.status == GameResult::Loss => {
            (format!("CRASHED! -{:.2}", s.loss_amount), 4_000)
        }
        RoundEventData::AutoBetToggled { enabled } => {
            let text = if *enabled { "Auto-bet enabled" } else { "Auto-bet disabled" };
            (text.to_string(), 2_000)
        }
        _ => return None,
    };
    Some((text, Duration::from_millis(millis)))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::Settlement;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_post_and_expire() {
        let mut bus = NotificationBus::new();
        bus.post("hello", secs(2), secs(10));

        assert_eq!(bus.active(secs(11)).map(|n| n.text.as_str()), Some("hello"));
        assert!(bus.active(secs(12)).is_none());

        bus.expire(secs(11));
        assert!(bus.active(secs(11)).is_some());
        bus.expire(secs(12));
        assert!(bus.active(secs(0)).is_none());
    }

    #[test]
    fn test_newer_message_replaces_older() {
        let mut bus = NotificationBus::new();
        bus.post("first", secs(10), secs(0));
        bus.post("second", secs(1), secs(1));
        assert_eq!(bus.active(secs(1)).unwrap().text, "second");
        assert!(bus.active(secs(3)).is_none());
    }

    #[test]
    fn test_queued_message_follows_active_one() {
        let mut bus = NotificationBus::new();
        bus.post("Error: bad token", secs(4), secs(0));
        bus.post_next("verification failed", secs(5), secs(0));

        assert_eq!(bus.active(secs(3)).unwrap().text, "Error: bad token");
        assert_eq!(bus.active(secs(4)).unwrap().text, "verification failed");

        bus.expire(secs(6));
        assert_eq!(bus.active(secs(8)).unwrap().text, "verification failed");
        assert!(bus.active(secs(9)).is_none());

        bus.post_next("later", secs(1), secs(10));
        bus.post("now", secs(1), secs(10));
        bus.expire(secs(11));
        assert!(bus.active(secs(11)).is_none());
    }

    #[test]
    fn test_round_event_messages() {
        let warning = RoundEvent::new(
            secs(5),
            1,
            RoundEventData::BettingClosingSoon { seconds_left: 5 },
        );
        let (text, ttl) = notification_for(&warning).unwrap();
        assert_eq!(text, "Only 5 seconds left to bet!");
        assert_eq!(ttl, Duration::from_millis(1_500));

        let loss = RoundEvent::new(
            secs(20),
            1,
            RoundEventData::Settled(Settlement {
                round: 1,
                status: GameResult::Loss,
                win_amount: 0.0,
                loss_amount: 100.0,
                multiplier: 1.3,
                bet_amount: 100.0,
            }),
        );
        assert_eq!(notification_for(&loss).unwrap().0, "CRASHED! -100.00");

        let tick = RoundEvent::new(secs(1), 1, RoundEventData::CountdownTick { seconds_left: 9 });
        assert!(notification_for(&tick).is_none());
    }
}
