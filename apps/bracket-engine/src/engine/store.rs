//! Bracket state storage port.

use async_trait::async_trait;

use crate::models::{BracketRecord, Transition};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with this idempotency key already exists.
    #[error("duplicate idempotency key: {0}")]
    DuplicateKey(String),

    /// No record exists for this key.
    #[error("bracket record not found: {0}")]
    NotFound(String),

    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable store for bracket lifecycle records.
///
/// One record per idempotency key, created once and updated in place; records
/// are never deleted. Writes are atomic per key; the engine additionally
/// serializes writers with a per-key lock, so implementations only need
/// statement-level atomicity. `list_pending` is the crash-recovery entry
/// point: it returns every record still in a working state.
#[async_trait]
pub trait BracketStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the key is already taken.
    async fn create(&self, record: &BracketRecord) -> Result<(), StoreError>;

    /// Fetch a record by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error only on backend failure; a missing key is `None`.
    async fn get(&self, key: &str) -> Result<Option<BracketRecord>, StoreError>;

    /// Persist the current state of an existing record.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    async fn save(&self, record: &BracketRecord) -> Result<(), StoreError>;

    /// Records in non-terminal states, for crash-recovery resumption.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    async fn list_pending(&self) -> Result<Vec<BracketRecord>, StoreError>;

    /// Append a state transition to the audit trail.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    async fn record_transition(&self, transition: &Transition) -> Result<(), StoreError>;

    /// The audit trail for a key, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    async fn transitions(&self, key: &str) -> Result<Vec<Transition>, StoreError>;
}
