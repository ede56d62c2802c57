//! Durable bracket lifecycle records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderIntent;

/// Lifecycle state of a bracket record.
///
/// `AwaitingPosition` and `BracketPending` are the working states; everything
/// else is terminal. Terminal records are never deleted; they are the audit
/// trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketState {
    /// Entry submitted, waiting for the exchange to reflect the position.
    AwaitingPosition,
    /// Position confirmed, bracket legs not yet fully resolved.
    BracketPending,
    /// Both legs confirmed placed.
    BracketPlaced,
    /// At least one leg permanently failed while the position is open.
    BracketFailed,
    /// The position closed before the bracket completed; no protection needed.
    BracketAborted,
    /// The entry order was rejected, cancelled or expired; no position exists.
    EntryRejected,
    /// Position confirmation attempts exhausted; outcome ambiguous, needs
    /// manual review.
    ConfirmationTimedOut,
}

impl BracketState {
    /// Whether this state ends the bracket's lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::AwaitingPosition | Self::BracketPending)
    }

    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingPosition => "awaiting_position",
            Self::BracketPending => "bracket_pending",
            Self::BracketPlaced => "bracket_placed",
            Self::BracketFailed => "bracket_failed",
            Self::BracketAborted => "bracket_aborted",
            Self::EntryRejected => "entry_rejected",
            Self::ConfirmationTimedOut => "confirmation_timed_out",
        }
    }

    /// Parse the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_position" => Some(Self::AwaitingPosition),
            "bracket_pending" => Some(Self::BracketPending),
            "bracket_placed" => Some(Self::BracketPlaced),
            "bracket_failed" => Some(Self::BracketFailed),
            "bracket_aborted" => Some(Self::BracketAborted),
            "entry_rejected" => Some(Self::EntryRejected),
            "confirmation_timed_out" => Some(Self::ConfirmationTimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for BracketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which bracket leg an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    /// The stop-loss leg.
    StopLoss,
    /// The take-profit leg.
    TakeProfit,
}

impl LegKind {
    /// Stable string form used in storage, client order ids and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }
}

impl std::fmt::Display for LegKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement status of a single bracket leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// Not yet placed.
    Pending,
    /// Confirmed placed at the exchange.
    Placed,
    /// Permanently failed; no further attempts.
    Failed,
}

impl LegStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Placed => "placed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "placed" => Some(Self::Placed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-leg tracking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegState {
    /// Placement status.
    pub status: LegStatus,
    /// Exchange order id once placed.
    pub order_id: Option<String>,
    /// Last error observed for this leg.
    pub last_error: Option<String>,
}

impl LegState {
    /// A leg that has not been attempted yet.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            status: LegStatus::Pending,
            order_id: None,
            last_error: None,
        }
    }

    /// Mark the leg placed with the exchange's order id.
    pub fn mark_placed(&mut self, order_id: String) {
        self.status = LegStatus::Placed;
        self.order_id = Some(order_id);
        self.last_error = None;
    }

    /// Mark the leg permanently failed.
    pub fn mark_failed(&mut self, error: String) {
        self.status = LegStatus::Failed;
        self.last_error = Some(error);
    }

    /// Whether the leg is confirmed placed.
    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.status == LegStatus::Placed
    }
}

impl Default for LegState {
    fn default() -> Self {
        Self::pending()
    }
}

/// Protection summary derived from the leg states.
///
/// Distinguishes "position exists, protection incomplete" from "no protection
/// at all"; the two have very different operational urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    /// Both legs are live.
    Full,
    /// Exactly one leg is live.
    Partial(LegKind),
    /// Neither leg is live.
    Unprotected,
}

/// The engine's durable record of one bracket's lifecycle.
///
/// Created on intent acceptance, mutated only by the engine, never deleted.
/// Progress (entry order id, which legs are placed) must survive a process
/// restart so a resumed worker never re-submits an already-placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketRecord {
    /// Unique idempotency key (primary lookup).
    pub idempotency_key: String,
    /// The validated intent this record executes.
    pub intent: OrderIntent,
    /// Current lifecycle state.
    pub state: BracketState,
    /// Exchange order id of the entry order, once submitted.
    pub entry_order_id: Option<String>,
    /// Stop-loss leg state.
    pub stop_loss: LegState,
    /// Take-profit leg state.
    pub take_profit: LegState,
    /// Actual position size confirmed by reconciliation (may be a partial
    /// fill; legs are sized to this, never to the requested size).
    pub confirmed_size: Option<Decimal>,
    /// Total leg submission attempts consumed.
    pub attempt_count: u32,
    /// Last record-level error.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl BracketRecord {
    /// Create a fresh record in `AwaitingPosition` for an accepted intent.
    #[must_use]
    pub fn new(intent: OrderIntent) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: intent.idempotency_key.clone(),
            intent,
            state: BracketState::AwaitingPosition,
            entry_order_id: None,
            stop_loss: LegState::pending(),
            take_profit: LegState::pending(),
            confirmed_size: None,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Borrow a leg by kind.
    #[must_use]
    pub const fn leg(&self, kind: LegKind) -> &LegState {
        match kind {
            LegKind::StopLoss => &self.stop_loss,
            LegKind::TakeProfit => &self.take_profit,
        }
    }

    /// Mutably borrow a leg by kind.
    pub const fn leg_mut(&mut self, kind: LegKind) -> &mut LegState {
        match kind {
            LegKind::StopLoss => &mut self.stop_loss,
            LegKind::TakeProfit => &mut self.take_profit,
        }
    }

    /// The trigger price for a leg of this bracket.
    #[must_use]
    pub const fn leg_price(&self, kind: LegKind) -> Decimal {
        match kind {
            LegKind::StopLoss => self.intent.stop_loss_price,
            LegKind::TakeProfit => self.intent.take_profit_price,
        }
    }

    /// Whether the lifecycle has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Summarize how well the position is protected.
    #[must_use]
    pub fn protection(&self) -> Protection {
        match (self.stop_loss.is_placed(), self.take_profit.is_placed()) {
            (true, true) => Protection::Full,
            (true, false) => Protection::Partial(LegKind::StopLoss),
            (false, true) => Protection::Partial(LegKind::TakeProfit),
            (false, false) => Protection::Unprotected,
        }
    }

    /// Bump `updated_at` before persisting a mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One audit-trail entry: a state transition of a bracket record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Key of the record that transitioned.
    pub idempotency_key: String,
    /// State before the transition (`None` for record creation).
    pub from: Option<BracketState>,
    /// State after the transition.
    pub to: BracketState,
    /// Human-readable context (error text, confirmed size, order ids).
    pub detail: Option<String>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Build a transition stamped with the current time.
    #[must_use]
    pub fn now(
        key: &str,
        from: Option<BracketState>,
        to: BracketState,
        detail: Option<String>,
    ) -> Self {
        Self {
            idempotency_key: key.to_string(),
            from,
            to,
            detail,
            at: Utc::now(),
        }
    }
}
