//! Bracket leg placement.
//!
//! Drives the stop-loss and take-profit legs of a confirmed position to
//! confirmed-placed or terminal-failed. The two legs are independent: a
//! failure on one never blocks or rolls back the other. The stop-loss leg is
//! always driven first so that, if only one leg survives a crash or failure
//! window, it is the protective one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::exchange::{ExchangeAdapter, ExchangeError, OrderRequest};
use crate::models::{BracketRecord, BracketState, LegKind, LegStatus, Protection, Transition};

use super::retry::{RetryClass, RetryError, RetryPolicy, RetryScheduler, classify_exchange};
use super::store::{BracketStore, StoreError};

/// One leg attempt's failure, classified for the retry scheduler.
#[derive(Debug, thiserror::Error)]
enum LegAttemptError {
    #[error("position no longer open")]
    PositionGone,
    #[error(transparent)]
    Exchange(ExchangeError),
}

fn classify_leg(error: &LegAttemptError) -> RetryClass {
    match error {
        LegAttemptError::PositionGone => RetryClass::Terminal,
        LegAttemptError::Exchange(e) => classify_exchange(e),
    }
}

enum LegResult {
    Placed { order_id: String, attempts: u32 },
    Failed { error: String, attempts: u32 },
    PositionGone,
    Cancelled,
}

/// Places bracket legs against a live position.
pub struct BracketPlacer {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn BracketStore>,
    scheduler: RetryScheduler,
    policy: RetryPolicy,
}

impl BracketPlacer {
    /// Create a placer.
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn BracketStore>,
        scheduler: RetryScheduler,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            exchange,
            store,
            scheduler,
            policy,
        }
    }

    /// Drive both bracket legs of a `BracketPending` record to an outcome.
    ///
    /// Already-resolved legs are skipped, so a resumed record never
    /// re-submits a placed leg. Each leg's order id is persisted before the
    /// sibling leg is attempted. Before every submission the position is
    /// re-checked; if it vanished the record is marked `BracketAborted`; the
    /// position simply no longer needs protection.
    ///
    /// # Errors
    ///
    /// Returns an error only when persisting progress fails; leg failures are
    /// recorded on the record itself.
    pub async fn place_bracket(&self, record: &mut BracketRecord) -> Result<(), StoreError> {
        for kind in [LegKind::StopLoss, LegKind::TakeProfit] {
            if record.leg(kind).status != LegStatus::Pending {
                continue;
            }

            match self.place_leg(record, kind).await {
                LegResult::Placed { order_id, attempts } => {
                    record.attempt_count += attempts;
                    record.leg_mut(kind).mark_placed(order_id);
                    record.touch();
                    self.store.save(record).await?;
                }
                LegResult::Failed { error, attempts } => {
                    record.attempt_count += attempts;
                    record.leg_mut(kind).mark_failed(error);
                    record.touch();
                    self.store.save(record).await?;
                }
                LegResult::PositionGone => {
                    return self.abort(record).await;
                }
                LegResult::Cancelled => {
                    // Shutdown: leave the record pending for resume.
                    return Ok(());
                }
            }
        }

        self.finish(record).await
    }

    /// Submit one leg under the retry policy.
    async fn place_leg(&self, record: &BracketRecord, kind: LegKind) -> LegResult {
        let attempts = AtomicU32::new(0);

        let result = self
            .scheduler
            .run(&self.policy, classify_leg, |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                let exchange = Arc::clone(&self.exchange);
                let symbol = record.intent.symbol.clone();
                let side = record.intent.side;
                let trigger_price = record.leg_price(kind);
                let client_order_id = format!("{}-{kind}", record.idempotency_key);
                let key = record.idempotency_key.clone();

                async move {
                    // Guard against the position having been closed between
                    // attempts (manually, by liquidation, or by the sibling
                    // leg filling).
                    let position = exchange
                        .get_position(&symbol)
                        .await
                        .map_err(LegAttemptError::Exchange)?
                        .filter(|p| p.matches(side));
                    let Some(position) = position else {
                        return Err(LegAttemptError::PositionGone);
                    };

                    // Size the leg to the live position so protection never
                    // exceeds the real exposure.
                    let request = OrderRequest::reduce_only_trigger(
                        symbol,
                        side.opposite(),
                        position.size,
                        trigger_price,
                    )
                    .with_client_order_id(client_order_id);

                    let ack = exchange
                        .place_order(&request)
                        .await
                        .map_err(LegAttemptError::Exchange)?;

                    tracing::info!(
                        key = %key,
                        leg = %kind,
                        order_id = %ack.order_id,
                        size = %request.size,
                        trigger_price = %trigger_price,
                        attempt,
                        "Bracket leg placed"
                    );
                    Ok(ack.order_id)
                }
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(order_id) => LegResult::Placed { order_id, attempts },
            Err(RetryError::Terminal(LegAttemptError::PositionGone)) => LegResult::PositionGone,
            Err(RetryError::Terminal(LegAttemptError::Exchange(e))) => {
                tracing::warn!(
                    key = %record.idempotency_key,
                    leg = %kind,
                    error = %e,
                    "Bracket leg rejected with non-retryable reason; surfacing immediately"
                );
                LegResult::Failed {
                    error: e.to_string(),
                    attempts,
                }
            }
            Err(RetryError::Exhausted { attempts: used, last }) => LegResult::Failed {
                error: format!("retries exhausted after {used} attempts: {last}"),
                attempts,
            },
            Err(RetryError::Cancelled) => LegResult::Cancelled,
        }
    }

    /// The position closed before the bracket completed.
    async fn abort(&self, record: &mut BracketRecord) -> Result<(), StoreError> {
        let from = record.state;
        record.state = BracketState::BracketAborted;
        record.touch();
        self.store.save(record).await?;
        self.store
            .record_transition(&Transition::now(
                &record.idempotency_key,
                Some(from),
                record.state,
                Some("position closed before bracket completed".to_string()),
            ))
            .await?;

        tracing::info!(
            key = %record.idempotency_key,
            symbol = %record.intent.symbol,
            "Position vanished before bracket completed; aborting without failure"
        );
        Ok(())
    }

    /// Aggregate leg outcomes into the record's terminal state.
    async fn finish(&self, record: &mut BracketRecord) -> Result<(), StoreError> {
        let from = record.state;
        let detail;

        if record.stop_loss.is_placed() && record.take_profit.is_placed() {
            record.state = BracketState::BracketPlaced;
            detail = format!(
                "stop_loss={} take_profit={}",
                record.stop_loss.order_id.as_deref().unwrap_or("?"),
                record.take_profit.order_id.as_deref().unwrap_or("?"),
            );
            tracing::info!(
                key = %record.idempotency_key,
                symbol = %record.intent.symbol,
                "Bracket fully placed"
            );
        } else {
            record.state = BracketState::BracketFailed;
            detail = match record.protection() {
                Protection::Partial(placed) => {
                    format!("position exists, protection incomplete: only {placed} leg is live")
                }
                _ => "position exists, no protection placed".to_string(),
            };
            record.last_error = Some(detail.clone());
            tracing::error!(
                key = %record.idempotency_key,
                symbol = %record.intent.symbol,
                protection = ?record.protection(),
                stop_loss_error = record.stop_loss.last_error.as_deref().unwrap_or(""),
                take_profit_error = record.take_profit.last_error.as_deref().unwrap_or(""),
                "Bracket failed with the position still open; live position is not fully protected"
            );
        }

        record.touch();
        self.store.save(record).await?;
        self.store
            .record_transition(&Transition::now(
                &record.idempotency_key,
                Some(from),
                record.state,
                Some(detail),
            ))
            .await
    }
}
