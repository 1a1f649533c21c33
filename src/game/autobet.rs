//! Auto-Bet Controller
//!
//! When enabled, places one bet a fixed delay after betting opens. The
//! pending bet is dropped if the phase changes or the player bets by hand.

use std::time::Duration;

/// Deferred auto-bet policy.
#[derive(Clone, Debug)]
pub struct AutoBetController {
    enabled: bool,
    delay: Duration,
    deadline: Option<Duration>,
}

impl AutoBetController {
    /// Create a disabled controller.
    pub fn new(delay: Duration) -> Self {
        Self {
            enabled: false,
            delay,
            deadline: None,
        }
    }

    /// Auto-bet is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// When the pending bet fires, if one is armed.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Switch on or off. Switching off drops a pending bet.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.deadline = None;
        }
    }

    /// Arm the deferred bet `delay` after `now`. No-op when disabled or
    /// already armed.
    pub fn arm(&mut self, now: Duration) {
        if self.enabled && self.deadline.is_none() {
            self.deadline = Some(now + self.delay);
        }
    }

    /// Drop the pending bet.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// True once when the armed deadline has passed. Disarms.
    pub fn poll(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(due) if due <= now => {
                self.deadline = None;
                self.enabled
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_disabled_never_arms() {
        let mut auto = AutoBetController::new(secs(2));
        auto.arm(secs(0));
        assert!(auto.deadline().is_none());
        assert!(!auto.poll(secs(10)));
    }

    #[test]
    fn test_fires_once_after_delay() {
        let mut auto = AutoBetController::new(secs(2));
        auto.set_enabled(true);
        auto.arm(secs(10));
        assert_eq!(auto.deadline(), Some(secs(12)));

        // re-arming keeps the original deadline
        auto.arm(secs(11));
        assert_eq!(auto.deadline(), Some(secs(12)));

        assert!(!auto.poll(secs(11)));
        assert!(auto.poll(secs(12)));
        assert!(!auto.poll(secs(13)));
    }

    #[test]
    fn test_disable_cancels_pending() {
        let mut auto = AutoBetController::new(secs(2));
        auto.set_enabled(true);
        auto.arm(secs(0));
        auto.set_enabled(false);
        assert!(auto.deadline().is_none());
        assert!(!auto.poll(secs(5)));
    }
}
