//! The bracket engine facade.
//!
//! Owns the store, the exchange adapter and the two lifecycle drivers
//! (reconciler and placer), and enforces the concurrency model: at most one
//! logical worker per idempotency key, full parallelism across keys, and
//! shutdown that never interrupts an in-flight network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::exchange::{ExchangeAdapter, ExchangeError, OrderRequest};
use crate::models::{BracketRecord, BracketState, OrderIntent, Transition};

use super::placer::BracketPlacer;
use super::reconciler::{PositionReconciler, ReconcileError};
use super::retry::{Clock, RetryPolicy, RetryScheduler, TokioClock};
use super::store::{BracketStore, StoreError};
use super::validator::{self, ValidationError};

/// Engine-level errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The intent failed validation; nothing was stored or sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The bracket store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Immediate response to an intent submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitAck {
    /// The intent's idempotency key.
    pub idempotency_key: String,
    /// The record's current lifecycle state.
    pub state: BracketState,
    /// Whether this submission created the record (`false` for duplicates).
    pub created: bool,
}

/// Tunables for the engine.
pub struct EngineOptions {
    /// Retry policy for position confirmation polling.
    pub confirmation_retry: RetryPolicy,
    /// Retry policy for each bracket leg.
    pub leg_retry: RetryPolicy,
    /// Clock used for backoff sleeps (swap for a fake in tests).
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            confirmation_retry: RetryPolicy::confirmation(),
            leg_retry: RetryPolicy::leg(),
            clock: Arc::new(TokioClock),
        }
    }
}

struct Inner {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn BracketStore>,
    reconciler: PositionReconciler,
    placer: BracketPlacer,
    shutdown: CancellationToken,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// The bracket-order execution engine.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct BracketEngine {
    inner: Arc<Inner>,
}

impl BracketEngine {
    /// Create an engine with default policies and the tokio clock.
    #[must_use]
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, store: Arc<dyn BracketStore>) -> Self {
        Self::with_options(exchange, store, EngineOptions::default())
    }

    /// Create an engine with explicit options.
    #[must_use]
    pub fn with_options(
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn BracketStore>,
        options: EngineOptions,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let scheduler = RetryScheduler::new(options.clock, shutdown.clone());

        let reconciler = PositionReconciler::new(
            Arc::clone(&exchange),
            scheduler.clone(),
            options.confirmation_retry,
        );
        let placer = BracketPlacer::new(
            Arc::clone(&exchange),
            Arc::clone(&store),
            scheduler,
            options.leg_retry,
        );

        Self {
            inner: Arc::new(Inner {
                exchange,
                store,
                reconciler,
                placer,
                shutdown,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Accept a bracket intent.
    ///
    /// Validates, creates the durable record, and spawns the lifecycle worker;
    /// returns immediately with the record's state. Re-submitting a key whose
    /// record already exists (with the same intent) returns the existing
    /// state without touching the exchange: exactly one record, one entry
    /// order and at most one bracket exist per key no matter how many times
    /// the caller retries.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] for malformed intents (returned synchronously,
    ///   nothing is stored or sent).
    /// - [`ValidationError::DuplicateKey`] when the key is already bound to a
    ///   different intent.
    /// - [`StoreError`] on storage failure.
    pub async fn submit(&self, intent: OrderIntent) -> Result<SubmitAck, EngineError> {
        let validated = validator::validate(intent)?;
        let key = validated.intent().idempotency_key.clone();

        let lock = self.key_lock(&key);
        let guard = lock.lock().await;

        if let Some(existing) = self.inner.store.get(&key).await? {
            if existing.intent != *validated.intent() {
                return Err(ValidationError::DuplicateKey(key).into());
            }
            tracing::debug!(
                key = %key,
                state = %existing.state,
                "Duplicate submission, returning existing record"
            );
            return Ok(SubmitAck {
                idempotency_key: key,
                state: existing.state,
                created: false,
            });
        }

        let record = BracketRecord::new(validated.into_inner());
        match self.inner.store.create(&record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => {
                // Another writer won the race; fall back to its record.
                let existing = self.inner.store.get(&key).await?.ok_or_else(|| {
                    EngineError::Store(StoreError::NotFound(key.clone()))
                })?;
                return Ok(SubmitAck {
                    idempotency_key: key,
                    state: existing.state,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.inner
            .store
            .record_transition(&Transition::now(
                &key,
                None,
                record.state,
                Some("intent accepted".to_string()),
            ))
            .await?;

        tracing::info!(
            key = %key,
            symbol = %record.intent.symbol,
            side = %record.intent.side,
            size = %record.intent.size,
            "Bracket intent accepted"
        );

        drop(guard);
        self.spawn_worker(&key);

        Ok(SubmitAck {
            idempotency_key: key,
            state: record.state,
            created: true,
        })
    }

    /// Spawn the background worker that drives a record's lifecycle.
    pub fn spawn_worker(&self, key: &str) {
        let engine = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.process(&key).await {
                tracing::error!(key = %key, error = %e, "Bracket worker failed");
            }
        });
    }

    /// Drive a record's lifecycle until it reaches a terminal state or
    /// shutdown intervenes. Idempotent: completed steps are skipped, so
    /// calling this concurrently with the background worker (or re-running it
    /// after a crash) never duplicates work.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or storage fails.
    pub async fn process(&self, key: &str) -> Result<BracketRecord, EngineError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut record = self
            .inner
            .store
            .get(key)
            .await?
            .ok_or_else(|| EngineError::Store(StoreError::NotFound(key.to_string())))?;

        while !record.is_terminal() && !self.inner.shutdown.is_cancelled() {
            match record.state {
                BracketState::AwaitingPosition => {
                    self.run_confirmation(&mut record).await?;
                    if record.state == BracketState::AwaitingPosition {
                        // Cancelled mid-confirmation; resume later.
                        break;
                    }
                }
                BracketState::BracketPending => {
                    self.inner.placer.place_bracket(&mut record).await?;
                    if record.state == BracketState::BracketPending {
                        break;
                    }
                }
                _ => break,
            }
        }

        Ok(record)
    }

    /// Entry submission plus position confirmation for `AwaitingPosition`.
    async fn run_confirmation(&self, record: &mut BracketRecord) -> Result<(), EngineError> {
        if record.entry_order_id.is_none() && !self.submit_entry(record).await? {
            return Ok(());
        }

        match self.inner.reconciler.confirm_position(record).await {
            Ok(position) => {
                // Market entries could not have the full ordering checked at
                // intake; flag an inverted leg against the actual fill price.
                // The legs are still placed; an inverted leg triggers
                // immediately, which still closes the exposure.
                if validator::check_price_order(
                    record.intent.side,
                    record.intent.stop_loss_price,
                    Some(position.entry_price),
                    record.intent.take_profit_price,
                )
                .is_err()
                {
                    tracing::warn!(
                        key = %record.idempotency_key,
                        fill_price = %position.entry_price,
                        stop_loss = %record.intent.stop_loss_price,
                        take_profit = %record.intent.take_profit_price,
                        "Confirmed fill price inverts a bracket leg; placing anyway"
                    );
                }

                record.confirmed_size = Some(position.size);
                self.transition(
                    record,
                    BracketState::BracketPending,
                    format!("position confirmed, size {}", position.size),
                )
                .await?;
            }
            Err(ReconcileError::EntryRejected { status }) => {
                record.last_error = Some(format!("entry order is {status}"));
                self.transition(
                    record,
                    BracketState::EntryRejected,
                    format!("entry order is {status}"),
                )
                .await?;
            }
            Err(e @ ReconcileError::ConfirmationTimedOut { .. })
            | Err(e @ ReconcileError::Exchange(_)) => {
                record.last_error = Some(e.to_string());
                self.transition(record, BracketState::ConfirmationTimedOut, e.to_string())
                    .await?;
            }
            Err(ReconcileError::Cancelled) => {}
        }

        Ok(())
    }

    /// Submit the entry order once. Returns `false` when the lifecycle should
    /// stop here (terminal rejection).
    async fn submit_entry(&self, record: &mut BracketRecord) -> Result<bool, EngineError> {
        let intent = &record.intent;
        let request = match intent.entry_price {
            Some(price) => OrderRequest::limit(
                intent.symbol.clone(),
                intent.side,
                intent.size,
                price,
            ),
            None => OrderRequest::market(intent.symbol.clone(), intent.side, intent.size),
        }
        .with_client_order_id(record.idempotency_key.clone());

        match self.inner.exchange.place_order(&request).await {
            Ok(ack) => {
                record.entry_order_id = Some(ack.order_id.clone());
                record.touch();
                self.inner.store.save(record).await?;
                tracing::info!(
                    key = %record.idempotency_key,
                    order_id = %ack.order_id,
                    status = %ack.status,
                    "Entry order submitted"
                );
                Ok(true)
            }
            Err(error) => {
                if let ExchangeError::Rejected { .. } = &error {
                    record.last_error = Some(error.to_string());
                    self.transition(record, BracketState::EntryRejected, error.to_string())
                        .await?;
                    return Ok(false);
                }

                // Ambiguous: the order may or may not have reached the book.
                // Do not resubmit: the entry carries the idempotency key as
                // client order id, and reconciliation resolves the outcome
                // either way (position appears, or confirmation times out for
                // manual review).
                tracing::warn!(
                    key = %record.idempotency_key,
                    error = %error,
                    "Entry submission outcome unknown; deferring to position reconciliation"
                );
                record.last_error = Some(error.to_string());
                record.touch();
                self.inner.store.save(record).await?;
                Ok(true)
            }
        }
    }

    /// Current record for a key, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn record(&self, key: &str) -> Result<Option<BracketRecord>, EngineError> {
        Ok(self.inner.store.get(key).await?)
    }

    /// Audit trail for a key, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn transitions(&self, key: &str) -> Result<Vec<Transition>, EngineError> {
        Ok(self.inner.store.transitions(key).await?)
    }

    /// Resume every non-terminal record, e.g. after a restart. Resumed
    /// workers skip completed steps, so an already-placed leg is never
    /// re-submitted.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn resume_pending(&self) -> Result<usize, EngineError> {
        let pending = self.inner.store.list_pending().await?;
        let count = pending.len();
        for record in pending {
            tracing::info!(
                key = %record.idempotency_key,
                state = %record.state,
                "Resuming pending bracket"
            );
            self.spawn_worker(&record.idempotency_key);
        }
        Ok(count)
    }

    /// Request shutdown: in-flight network calls finish, no new attempt
    /// starts, pending records stay resumable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Persist a state change and its audit transition.
    async fn transition(
        &self,
        record: &mut BracketRecord,
        to: BracketState,
        detail: String,
    ) -> Result<(), EngineError> {
        let from = record.state;
        record.state = to;
        record.touch();
        self.inner.store.save(record).await?;
        self.inner
            .store
            .record_transition(&Transition::now(
                &record.idempotency_key,
                Some(from),
                to,
                Some(detail),
            ))
            .await?;
        Ok(())
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
