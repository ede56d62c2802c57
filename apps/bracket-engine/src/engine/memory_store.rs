//! In-memory bracket store for testing and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::{BracketRecord, Transition};

use super::store::{BracketStore, StoreError};

/// In-memory implementation of [`BracketStore`].
///
/// Suitable for tests and development. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryBracketStore {
    records: RwLock<HashMap<String, BracketRecord>>,
    transitions: RwLock<Vec<Transition>>,
}

impl InMemoryBracketStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BracketStore for InMemoryBracketStore {
    async fn create(&self, record: &BracketRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if records.contains_key(&record.idempotency_key) {
            return Err(StoreError::DuplicateKey(record.idempotency_key.clone()));
        }

        records.insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<BracketRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn save(&self, record: &BracketRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        records.insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<BracketRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }

    async fn record_transition(&self, transition: &Transition) -> Result<(), StoreError> {
        let mut transitions = self
            .transitions
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        transitions.push(transition.clone());
        Ok(())
    }

    async fn transitions(&self, key: &str) -> Result<Vec<Transition>, StoreError> {
        let transitions = self
            .transitions
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(transitions
            .iter()
            .filter(|t| t.idempotency_key == key)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BracketState, OrderIntent, OrderSide};
    use rust_decimal_macros::dec;

    fn make_record(key: &str) -> BracketRecord {
        BracketRecord::new(OrderIntent {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(3),
            entry_price: Some(dec!(103890)),
            stop_loss_price: dec!(101000),
            take_profit_price: dec!(107800),
            idempotency_key: key.to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryBracketStore::new();
        store.create(&make_record("k1")).await.unwrap();

        let found = store.get("k1").await.unwrap().unwrap();
        assert_eq!(found.idempotency_key, "k1");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let store = InMemoryBracketStore::new();
        store.create(&make_record("k1")).await.unwrap();

        let err = store.create(&make_record("k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_pending_excludes_terminal() {
        let store = InMemoryBracketStore::new();
        store.create(&make_record("working")).await.unwrap();

        let mut done = make_record("done");
        done.state = BracketState::BracketPlaced;
        store.create(&done).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key, "working");
    }

    #[tokio::test]
    async fn test_transitions_filtered_by_key() {
        let store = InMemoryBracketStore::new();
        store
            .record_transition(&Transition::now(
                "k1",
                None,
                BracketState::AwaitingPosition,
                None,
            ))
            .await
            .unwrap();
        store
            .record_transition(&Transition::now(
                "k2",
                None,
                BracketState::AwaitingPosition,
                None,
            ))
            .await
            .unwrap();
        store
            .record_transition(&Transition::now(
                "k1",
                Some(BracketState::AwaitingPosition),
                BracketState::BracketPending,
                Some("size 3".to_string()),
            ))
            .await
            .unwrap();

        let trail = store.transitions("k1").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].to, BracketState::BracketPending);
    }
}
