//! Wager Ledger
//!
//! Owns the balance, the stake of the current round, and the settled history.
//! A stake is debited exactly once, when the bet is placed; settling a loss
//! never touches the balance again.

use chrono::Utc;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::state::{GameResult, RoundPhase, RoundRecord};

/// Smallest bet the ledger accepts.
pub const MIN_BET: f64 = 1.0;

/// Why a ledger operation was refused. The ledger is unchanged when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum BetRejection {
    /// The operation is not allowed in this phase.
    #[error("not allowed while {0:?}")]
    WrongPhase(RoundPhase),
    /// A bet is already placed this round.
    #[error("bet already placed")]
    AlreadyPlaced,
    /// Balance does not cover the bet amount.
    #[error("insufficient balance: {balance:.2} < {bet_amount:.2}")]
    InsufficientBalance {
        /// Current balance.
        balance: f64,
        /// Requested stake.
        bet_amount: f64,
    },
    /// No bet is outstanding.
    #[error("no active bet")]
    NoActiveBet,
    /// The session has been torn down.
    #[error("session closed")]
    SessionClosed,
}

/// A settled staked round, as reported to the settlement service.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Round counter.
    pub round: u64,
    /// Win or loss.
    pub status: GameResult,
    /// Amount credited on a win.
    pub win_amount: f64,
    /// Stake lost on a loss.
    pub loss_amount: f64,
    /// Multiplier at the moment of settlement.
    pub multiplier: f64,
    /// Stake of the round.
    pub bet_amount: f64,
}

/// Balance, stake and history for one session.
#[derive(Clone, Debug)]
pub struct WagerLedger {
    balance: f64,
    bet_amount: f64,
    min_bet: f64,
    stake: Option<f64>,
    game_result: Option<GameResult>,
    win_multiplier: f64,
    loss_multiplier: u32,
    history: Vec<RoundRecord>,
}

impl Default for WagerLedger {
    fn default() -> Self {
        Self::new(crate::DEFAULT_BALANCE, crate::DEFAULT_BET_AMOUNT)
    }
}

impl WagerLedger {
    /// Create a ledger. Negative balances are floored at zero and the bet
    /// amount is clamped.
    pub fn new(balance: f64, bet_amount: f64) -> Self {
        Self::with_min_bet(balance, bet_amount, MIN_BET)
    }

    /// Create a ledger with a custom minimum bet.
    pub fn with_min_bet(balance: f64, bet_amount: f64, min_bet: f64) -> Self {
        let mut ledger = Self {
            balance: if balance.is_finite() { balance.max(0.0) } else { 0.0 },
            bet_amount: min_bet,
            min_bet,
            stake: None,
            game_result: None,
            win_multiplier: 0.0,
            loss_multiplier: 0,
            history: Vec::new(),
        };
        ledger.update_bet_amount(bet_amount);
        ledger
    }

    /// Current balance.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Configured bet amount.
    pub fn bet_amount(&self) -> f64 {
        self.bet_amount
    }

    /// True if a stake is outstanding or was settled this round.
    pub fn has_placed_bet(&self) -> bool {
        self.stake.is_some()
    }

    /// Stake debited this round.
    pub fn stake(&self) -> Option<f64> {
        self.stake
    }

    /// Outcome of the concluded round.
    pub fn game_result(&self) -> Option<GameResult> {
        self.game_result
    }

    /// Cash-out multiplier of the concluded round, 0 if none.
    pub fn win_multiplier(&self) -> f64 {
        self.win_multiplier
    }

    /// Display multiplier of the lost round, 0 if none.
    pub fn loss_multiplier(&self) -> u32 {
        self.loss_multiplier
    }

    /// Settled rounds, oldest first.
    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Settled multipliers, oldest first.
    pub fn history_multipliers(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.multiplier).collect()
    }

    /// True if a bet could be placed during betting right now.
    pub fn can_bet(&self) -> bool {
        self.stake.is_none() && self.balance >= self.bet_amount
    }

    /// Set the bet amount, clamped into `[min_bet, balance]`. Returns the stored amount.
    ///
    /// When the balance is below the minimum, the minimum wins and the next
    /// placement is refused for lack of funds.
    pub fn update_bet_amount(&mut self, amount: f64) -> f64 {
        let amount = if amount.is_finite() { amount } else { self.min_bet };
        self.bet_amount = amount.min(self.balance).max(self.min_bet);
        self.bet_amount
    }

    /// Reset per-round fields at betting entry.
    pub fn begin_round(&mut self) {
        self.stake = None;
        self.game_result = None;
        self.win_multiplier = 0.0;
        self.loss_multiplier = 0;
        let amount = self.bet_amount;
        self.update_bet_amount(amount);
    }

    /// Debit the bet amount. Returns the stake.
    pub fn place_bet(&mut self, phase: RoundPhase) -> Result<f64, BetRejection> {
        if phase != RoundPhase::Betting {
            return Err(BetRejection::WrongPhase(phase));
        }
        if self.stake.is_some() {
            return Err(BetRejection::AlreadyPlaced);
        }
        if self.balance < self.bet_amount {
            return Err(BetRejection::InsufficientBalance {
                balance: self.balance,
                bet_amount: self.bet_amount,
            });
        }

        self.balance -= self.bet_amount;
        self.stake = Some(self.bet_amount);
        Ok(self.bet_amount)
    }

    /// Credit `stake * multiplier` and record the win.
    pub fn cash_out(
        &mut self,
        round: u64,
        phase: RoundPhase,
        multiplier: f64,
    ) -> Result<Settlement, BetRejection> {
        if phase != RoundPhase::Flying {
            return Err(BetRejection::WrongPhase(phase));
        }
        let stake = self.stake.ok_or(BetRejection::NoActiveBet)?;
        if self.game_result.is_some() {
            return Err(BetRejection::NoActiveBet);
        }

        let win_amount = stake * multiplier;
        self.balance += win_amount;
        self.game_result = Some(GameResult::Win);
        self.win_multiplier = multiplier;
        self.record(round, multiplier, Some(GameResult::Win));

        Ok(Settlement {
            round,
            status: GameResult::Win,
            win_amount,
            loss_amount: 0.0,
            multiplier,
            bet_amount: stake,
        })
    }

    /// Settle a crash. Records `crash_point` in history and returns a
    /// settlement only when a stake was outstanding. A round that was
    /// already settled by a cash-out is left untouched.
    pub fn settle_loss(
        &mut self,
        round: u64,
        crash_point: f64,
        multiplier: f64,
        loss_multiplier: u32,
    ) -> Option<Settlement> {
        if self.game_result.is_some() {
            return None;
        }

        let Some(stake) = self.stake else {
            self.record(round, crash_point, None);
            return None;
        };

        self.game_result = Some(GameResult::Loss);
        self.loss_multiplier = loss_multiplier;
        self.record(round, crash_point, Some(GameResult::Loss));

        Some(Settlement {
            round,
            status: GameResult::Loss,
            win_amount: 0.0,
            loss_amount: stake,
            multiplier,
            bet_amount: stake,
        })
    }

    fn record(&mut self, round: u64, multiplier: f64, result: Option<GameResult>) {
        self.history.push(RoundRecord {
            round,
            multiplier,
            result,
            settled_at: Utc::now(),
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
