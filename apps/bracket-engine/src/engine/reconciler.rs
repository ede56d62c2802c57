//! Position confirmation after entry submission.
//!
//! Order submission and its effect are not atomic: the exchange may take time
//! to reflect the new position, fill it partially, or never fill it at all.
//! The reconciler polls the venue's actual state until the position appears,
//! the entry order is reported dead, or the attempt budget is spent.

use std::sync::Arc;

use crate::exchange::{ExchangeAdapter, ExchangeError, ExchangeOrderStatus};
use crate::models::{BracketRecord, Position};

use super::retry::{RetryClass, RetryError, RetryPolicy, RetryScheduler, classify_exchange};

/// Outcome of a failed confirmation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The entry order was rejected, cancelled or expired; no position will
    /// appear.
    #[error("entry order is {status}")]
    EntryRejected {
        /// The entry order's reported status.
        status: ExchangeOrderStatus,
    },

    /// The attempt budget was spent without the position appearing. The
    /// outcome is ambiguous (the position may or may not exist) and needs
    /// manual review.
    #[error("position not confirmed after {attempts} attempts")]
    ConfirmationTimedOut {
        /// Attempts consumed.
        attempts: u32,
        /// Last error observed while polling.
        last_error: Option<String>,
    },

    /// A non-retryable exchange failure while confirming.
    #[error(transparent)]
    Exchange(ExchangeError),

    /// Shutdown preempted confirmation; the record stays pending for resume.
    #[error("confirmation cancelled by shutdown")]
    Cancelled,
}

/// One poll attempt's failure, classified for the retry scheduler.
#[derive(Debug, thiserror::Error)]
enum ConfirmAttemptError {
    #[error("position not visible yet")]
    NotVisible,
    #[error("entry order is {0}")]
    EntryDead(ExchangeOrderStatus),
    #[error(transparent)]
    Exchange(ExchangeError),
}

fn classify_confirm(error: &ConfirmAttemptError) -> RetryClass {
    match error {
        ConfirmAttemptError::NotVisible => RetryClass::Transient,
        ConfirmAttemptError::EntryDead(_) => RetryClass::Terminal,
        ConfirmAttemptError::Exchange(e) => classify_exchange(e),
    }
}

/// Polls the exchange until the position resulting from an entry order is
/// confirmed.
pub struct PositionReconciler {
    exchange: Arc<dyn ExchangeAdapter>,
    scheduler: RetryScheduler,
    policy: RetryPolicy,
}

impl PositionReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        scheduler: RetryScheduler,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            exchange,
            scheduler,
            policy,
        }
    }

    /// Confirm the position for a record's intent.
    ///
    /// Succeeds as soon as an open position matching the intent's side is
    /// visible. A smaller-than-requested size (partial fill) is accepted;
    /// the bracket is later sized to the actual exposure, never the request.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::EntryRejected`] when the venue reports the entry
    ///   order dead.
    /// - [`ReconcileError::ConfirmationTimedOut`] when attempts run out with
    ///   the outcome still unknown. This ambiguity is logged at error level,
    ///   never discarded.
    pub async fn confirm_position(
        &self,
        record: &BracketRecord,
    ) -> Result<Position, ReconcileError> {
        let symbol = record.intent.symbol.clone();
        let side = record.intent.side;
        let entry_order_id = record.entry_order_id.clone();
        let requested = record.intent.size;

        let result = self
            .scheduler
            .run(&self.policy, classify_confirm, |attempt| {
                let exchange = Arc::clone(&self.exchange);
                let symbol = symbol.clone();
                let entry_order_id = entry_order_id.clone();
                async move {
                    let position = exchange
                        .get_position(&symbol)
                        .await
                        .map_err(ConfirmAttemptError::Exchange)?;

                    if let Some(position) = position {
                        if position.matches(side) {
                            return Ok(position);
                        }
                    }

                    // No matching position yet: check whether the entry order
                    // itself is already dead before burning another attempt.
                    if let Some(order_id) = entry_order_id.as_deref() {
                        let status = exchange
                            .get_order_status(order_id)
                            .await
                            .map_err(ConfirmAttemptError::Exchange)?;
                        if status.is_dead() {
                            return Err(ConfirmAttemptError::EntryDead(status));
                        }
                    }

                    tracing::debug!(attempt, symbol = %symbol, "Position not visible yet");
                    Err(ConfirmAttemptError::NotVisible)
                }
            })
            .await;

        match result {
            Ok(position) => {
                if position.size < requested {
                    tracing::info!(
                        key = %record.idempotency_key,
                        requested = %requested,
                        confirmed = %position.size,
                        "Partial fill confirmed; bracket will be sized to actual position"
                    );
                }
                Ok(position)
            }
            Err(RetryError::Terminal(ConfirmAttemptError::EntryDead(status))) => {
                tracing::warn!(
                    key = %record.idempotency_key,
                    status = %status,
                    "Entry order will never fill"
                );
                Err(ReconcileError::EntryRejected { status })
            }
            Err(RetryError::Terminal(ConfirmAttemptError::Exchange(e))) => {
                Err(ReconcileError::Exchange(e))
            }
            Err(RetryError::Terminal(ConfirmAttemptError::NotVisible)) => {
                // NotVisible is always classified transient.
                Err(ReconcileError::ConfirmationTimedOut {
                    attempts: 0,
                    last_error: None,
                })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(
                    key = %record.idempotency_key,
                    symbol = %record.intent.symbol,
                    attempts,
                    last_error = %last,
                    "Position confirmation timed out; the position may or may not exist; \
                     manual reconciliation required"
                );
                Err(ReconcileError::ConfirmationTimedOut {
                    attempts,
                    last_error: Some(last.to_string()),
                })
            }
            Err(RetryError::Cancelled) => Err(ReconcileError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeAdapter;
    use crate::models::{OrderIntent, OrderSide};
    use crate::engine::retry::InstantClock;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            jitter_factor: 0.0,
            ..RetryPolicy::confirmation()
        }
    }

    fn make_record(entry_order_id: Option<&str>) -> BracketRecord {
        let mut record = BracketRecord::new(OrderIntent {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            entry_price: Some(dec!(103890)),
            stop_loss_price: dec!(101000),
            take_profit_price: dec!(107800),
            idempotency_key: "key-1".to_string(),
        });
        record.entry_order_id = entry_order_id.map(str::to_string);
        record
    }

    fn btc_long(size: Decimal) -> Position {
        Position {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size,
            entry_price: dec!(103890),
            liquidation_price: None,
        }
    }

    fn reconciler(
        mock: &Arc<MockExchangeAdapter>,
        clock: &Arc<InstantClock>,
        max_attempts: u32,
    ) -> PositionReconciler {
        let scheduler = RetryScheduler::new(
            Arc::clone(clock) as Arc<dyn crate::engine::retry::Clock>,
            CancellationToken::new(),
        );
        PositionReconciler::new(
            Arc::clone(mock) as Arc<dyn ExchangeAdapter>,
            scheduler,
            policy(max_attempts),
        )
    }

    #[tokio::test]
    async fn test_confirms_after_delayed_visibility() {
        let mock = Arc::new(MockExchangeAdapter::new());
        mock.queue_position(Ok(None));
        mock.queue_position(Ok(None));
        mock.set_position(Some(btc_long(dec!(10))));

        let clock = Arc::new(InstantClock::new());
        let position = reconciler(&mock, &clock, 10)
            .confirm_position(&make_record(Some("entry-1")))
            .await
            .unwrap();

        assert_eq!(position.size, dec!(10));
        assert_eq!(clock.slept().len(), 2);
        assert_eq!(mock.position_calls(), 3);
    }

    #[tokio::test]
    async fn test_partial_fill_accepted_at_actual_size() {
        let mock = Arc::new(MockExchangeAdapter::new());
        mock.set_position(Some(btc_long(dec!(6))));

        let clock = Arc::new(InstantClock::new());
        let position = reconciler(&mock, &clock, 10)
            .confirm_position(&make_record(Some("entry-1")))
            .await
            .unwrap();

        assert_eq!(position.size, dec!(6));
    }

    #[tokio::test]
    async fn test_dead_entry_order_is_terminal() {
        let mock = Arc::new(MockExchangeAdapter::new());
        mock.queue_order_status(Ok(ExchangeOrderStatus::Cancelled));

        let clock = Arc::new(InstantClock::new());
        let err = reconciler(&mock, &clock, 10)
            .confirm_position(&make_record(Some("entry-1")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::EntryRejected {
                status: ExchangeOrderStatus::Cancelled
            }
        ));
        // Terminal on the first attempt: no backoff consumed.
        assert!(clock.slept().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_attempt_count() {
        let mock = Arc::new(MockExchangeAdapter::new());

        let clock = Arc::new(InstantClock::new());
        let err = reconciler(&mock, &clock, 3)
            .confirm_position(&make_record(Some("entry-1")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ConfirmationTimedOut { attempts: 3, .. }
        ));
        assert_eq!(mock.position_calls(), 3);
    }

    #[tokio::test]
    async fn test_opposite_side_position_does_not_confirm() {
        let mock = Arc::new(MockExchangeAdapter::new());
        let mut short = btc_long(dec!(5));
        short.side = OrderSide::Sell;
        mock.set_position(Some(short));

        let clock = Arc::new(InstantClock::new());
        let err = reconciler(&mock, &clock, 2)
            .confirm_position(&make_record(None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ConfirmationTimedOut { .. }
        ));
        // Without an entry order id there is nothing to interrogate.
        assert_eq!(mock.status_calls(), 0);
    }
}
