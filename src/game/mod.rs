//! Game Logic Module
//!
//! Round simulation for one player session. Driven entirely by the session
//! clock passed to `tick`, so a run is reproducible from its seed.
//!
//! ## Module Structure
//!
//! - `state`: Round phase, round state, snapshots
//! - `ledger`: Balance, stake, settlement, history
//! - `scheduler`: Authoritative phase state machine
//! - `autobet`: Deferred automatic bet policy
//! - `events`: Round events for notification and reporting
//! - `notify`: Transient user-facing messages

pub mod state;
pub mod ledger;
pub mod scheduler;
pub mod autobet;
pub mod events;
pub mod notify;

// Re-export key types
pub use state::{GameResult, PlanePosition, RoundPhase, RoundSnapshot, RoundState};
pub use ledger::{BetRejection, Settlement, WagerLedger};
pub use scheduler::{RoundConfig, RoundScheduler};
pub use events::{RoundEvent, RoundEventData};
pub use notify::{Notification, NotificationBus};
