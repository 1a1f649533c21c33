//! # Crash Round Server
//!
//! Round state machine and simulation engine for a single-player crash
//! betting game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Xorshift128+ PRNG, scripted source        │
//! │  ├── sampler.rs  - Crash point / duration distributions      │
//! │  └── curve.rs    - Multiplier curve and flight path          │
//! │                                                              │
//! │  game/           - Round logic (deterministic)               │
//! │  ├── state.rs    - Phases, round state, snapshots            │
//! │  ├── ledger.rs   - Balance, stake, settlement, history       │
//! │  ├── scheduler.rs- Authoritative phase state machine         │
//! │  ├── autobet.rs  - Deferred automatic bet                    │
//! │  ├── events.rs   - Round events                              │
//! │  └── notify.rs   - Transient notifications                   │
//! │                                                              │
//! │  network/        - I/O (non-deterministic)                   │
//! │  ├── auth.rs     - Session credentials                       │
//! │  ├── gateway.rs  - Settlement service client                 │
//! │  ├── session.rs  - Session lifecycle and reporting           │
//! │  ├── protocol.rs - Feed message types                        │
//! │  └── server.rs   - WebSocket feed and driver task            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! The `core/` and `game/` modules never read the clock or perform I/O:
//! - Time arrives as the `now` argument of `tick` and the commands
//! - All randomness comes from one injected `RandomSource`
//!
//! Given the same seed and the same command timings, a session produces
//! the same rounds.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::{DeterministicRng, RandomSource, SequenceSource};
pub use game::ledger::{BetRejection, WagerLedger};
pub use game::scheduler::{RoundConfig, RoundScheduler};
pub use game::state::{GameResult, RoundPhase, RoundSnapshot};
pub use network::session::GameSession;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Flight and snapshot frame rate (Hz)
pub const FRAME_RATE: u32 = 60;

/// Starting balance before the settlement service reports one
pub const DEFAULT_BALANCE: f64 = 10_000.0;

/// Bet amount used when the settlement service does not supply one
pub const DEFAULT_BET_AMOUNT: f64 = 10.0;
