//! SQLite-backed bracket store.
//!
//! Durable storage for bracket lifecycle records and their transition audit
//! trail. The intent travels as a JSON column; the lifecycle fields the
//! engine queries by (state, leg statuses, order ids) are first-class columns
//! so `list_pending` and post-incident review never parse JSON.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::info;

use crate::models::{BracketRecord, BracketState, LegState, LegStatus, Transition};

use super::store::{BracketStore, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS bracket_records (
        idempotency_key TEXT PRIMARY KEY,
        intent_json TEXT NOT NULL,
        state TEXT NOT NULL,
        entry_order_id TEXT,
        stop_loss_status TEXT NOT NULL,
        stop_loss_order_id TEXT,
        stop_loss_error TEXT,
        take_profit_status TEXT NOT NULL,
        take_profit_order_id TEXT,
        take_profit_error TEXT,
        confirmed_size TEXT,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bracket_records_state
        ON bracket_records (state)",
    "CREATE TABLE IF NOT EXISTS bracket_transitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        idempotency_key TEXT NOT NULL,
        from_state TEXT,
        to_state TEXT NOT NULL,
        detail TEXT,
        at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bracket_transitions_key
        ON bracket_transitions (idempotency_key)",
];

/// SQLite implementation of [`BracketStore`].
#[derive(Debug, Clone)]
pub struct SqliteBracketStore {
    pool: SqlitePool,
}

impl SqliteBracketStore {
    /// Connect to a SQLite database and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema setup fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(database_url, "Bracket store initialized");
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// Pinned to a single connection: each pooled SQLite connection would
    /// otherwise open its own private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema setup fails.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Close the connection pool, flushing outstanding writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<BracketRecord, StoreError> {
        let intent_json: String = row
            .try_get("intent_json")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let intent = serde_json::from_str(&intent_json)
            .map_err(|e| StoreError::Backend(format!("corrupt intent json: {e}")))?;

        let key: String = row
            .try_get("idempotency_key")
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(BracketRecord {
            idempotency_key: key,
            intent,
            state: parse_state(&get_text(row, "state")?)?,
            entry_order_id: get_opt_text(row, "entry_order_id"),
            stop_loss: LegState {
                status: parse_leg_status(&get_text(row, "stop_loss_status")?)?,
                order_id: get_opt_text(row, "stop_loss_order_id"),
                last_error: get_opt_text(row, "stop_loss_error"),
            },
            take_profit: LegState {
                status: parse_leg_status(&get_text(row, "take_profit_status")?)?,
                order_id: get_opt_text(row, "take_profit_order_id"),
                last_error: get_opt_text(row, "take_profit_error"),
            },
            confirmed_size: get_opt_text(row, "confirmed_size")
                .map(|s| {
                    Decimal::from_str(&s)
                        .map_err(|e| StoreError::Backend(format!("corrupt confirmed size: {e}")))
                })
                .transpose()?,
            attempt_count: row
                .try_get::<i64, _>("attempt_count")
                .map_err(|e| StoreError::Backend(e.to_string()))? as u32,
            last_error: get_opt_text(row, "last_error"),
            created_at: parse_timestamp(&get_text(row, "created_at")?)?,
            updated_at: parse_timestamp(&get_text(row, "updated_at")?)?,
        })
    }

    async fn write_record(&self, record: &BracketRecord, upsert: bool) -> Result<(), StoreError> {
        let intent_json = serde_json::to_string(&record.intent)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let conflict_clause = if upsert {
            "ON CONFLICT(idempotency_key) DO UPDATE SET
                intent_json = excluded.intent_json,
                state = excluded.state,
                entry_order_id = excluded.entry_order_id,
                stop_loss_status = excluded.stop_loss_status,
                stop_loss_order_id = excluded.stop_loss_order_id,
                stop_loss_error = excluded.stop_loss_error,
                take_profit_status = excluded.take_profit_status,
                take_profit_order_id = excluded.take_profit_order_id,
                take_profit_error = excluded.take_profit_error,
                confirmed_size = excluded.confirmed_size,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at"
        } else {
            ""
        };

        let sql = format!(
            "INSERT INTO bracket_records (
                idempotency_key, intent_json, state, entry_order_id,
                stop_loss_status, stop_loss_order_id, stop_loss_error,
                take_profit_status, take_profit_order_id, take_profit_error,
                confirmed_size, attempt_count, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            {conflict_clause}"
        );

        let result = sqlx::query(&sql)
            .bind(&record.idempotency_key)
            .bind(&intent_json)
            .bind(record.state.as_str())
            .bind(record.entry_order_id.as_deref())
            .bind(record.stop_loss.status.as_str())
            .bind(record.stop_loss.order_id.as_deref())
            .bind(record.stop_loss.last_error.as_deref())
            .bind(record.take_profit.status.as_str())
            .bind(record.take_profit.order_id.as_deref())
            .bind(record.take_profit.last_error.as_deref())
            .bind(record.confirmed_size.map(|s| s.to_string()))
            .bind(i64::from(record.attempt_count))
            .bind(record.last_error.as_deref())
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateKey(record.idempotency_key.clone()))
            }
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}

fn get_text(row: &SqliteRow, column: &str) -> Result<String, StoreError> {
    row.try_get::<String, _>(column)
        .map_err(|e| StoreError::Backend(format!("{column}: {e}")))
}

fn get_opt_text(row: &SqliteRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column).ok().flatten()
}

fn parse_state(s: &str) -> Result<BracketState, StoreError> {
    BracketState::parse(s).ok_or_else(|| StoreError::Backend(format!("corrupt state: {s}")))
}

fn parse_leg_status(s: &str) -> Result<LegStatus, StoreError> {
    LegStatus::parse(s).ok_or_else(|| StoreError::Backend(format!("corrupt leg status: {s}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("corrupt timestamp {s}: {e}")))
}

#[async_trait]
impl BracketStore for SqliteBracketStore {
    async fn create(&self, record: &BracketRecord) -> Result<(), StoreError> {
        self.write_record(record, false).await
    }

    async fn get(&self, key: &str) -> Result<Option<BracketRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM bracket_records WHERE idempotency_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn save(&self, record: &BracketRecord) -> Result<(), StoreError> {
        self.write_record(record, true).await
    }

    async fn list_pending(&self) -> Result<Vec<BracketRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM bracket_records
             WHERE state IN ('awaiting_position', 'bracket_pending')
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn record_transition(&self, transition: &Transition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bracket_transitions (idempotency_key, from_state, to_state, detail, at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&transition.idempotency_key)
        .bind(transition.from.map(BracketState::as_str))
        .bind(transition.to.as_str())
        .bind(transition.detail.as_deref())
        .bind(transition.at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn transitions(&self, key: &str) -> Result<Vec<Transition>, StoreError> {
        let rows = sqlx::query(
            "SELECT idempotency_key, from_state, to_state, detail, at
             FROM bracket_transitions WHERE idempotency_key = ?1 ORDER BY id",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(Transition {
                    idempotency_key: get_text(row, "idempotency_key")?,
                    from: get_opt_text(row, "from_state")
                        .map(|s| parse_state(&s))
                        .transpose()?,
                    to: parse_state(&get_text(row, "to_state")?)?,
                    detail: get_opt_text(row, "detail"),
                    at: parse_timestamp(&get_text(row, "at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderIntent, OrderSide};
    use rust_decimal_macros::dec;

    fn make_record(key: &str) -> BracketRecord {
        BracketRecord::new(OrderIntent {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            entry_price: Some(dec!(103890)),
            stop_loss_price: dec!(101000),
            take_profit_price: dec!(107800),
            idempotency_key: key.to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let store = SqliteBracketStore::in_memory().await.unwrap();
        let mut record = make_record("k1");
        record.entry_order_id = Some("entry-1".to_string());
        record.confirmed_size = Some(dec!(6));

        store.create(&record).await.unwrap();
        let found = store.get("k1").await.unwrap().unwrap();

        assert_eq!(found.intent, record.intent);
        assert_eq!(found.entry_order_id.as_deref(), Some("entry-1"));
        assert_eq!(found.confirmed_size, Some(dec!(6)));
        assert_eq!(found.state, BracketState::AwaitingPosition);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = SqliteBracketStore::in_memory().await.unwrap();
        store.create(&make_record("k1")).await.unwrap();

        let err = store.create(&make_record("k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_save_updates_leg_progress() {
        let store = SqliteBracketStore::in_memory().await.unwrap();
        let mut record = make_record("k1");
        store.create(&record).await.unwrap();

        record.state = BracketState::BracketPending;
        record.stop_loss.mark_placed("sl-42".to_string());
        record.touch();
        store.save(&record).await.unwrap();

        let found = store.get("k1").await.unwrap().unwrap();
        assert_eq!(found.state, BracketState::BracketPending);
        assert!(found.stop_loss.is_placed());
        assert_eq!(found.stop_loss.order_id.as_deref(), Some("sl-42"));
        assert_eq!(found.take_profit.status, LegStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_pending_filters_terminal() {
        let store = SqliteBracketStore::in_memory().await.unwrap();
        store.create(&make_record("working")).await.unwrap();

        let mut placed = make_record("placed");
        placed.state = BracketState::BracketPlaced;
        store.create(&placed).await.unwrap();

        let mut failed = make_record("failed");
        failed.state = BracketState::BracketFailed;
        store.create(&failed).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key, "working");
    }

    #[tokio::test]
    async fn test_transition_audit_trail() {
        let store = SqliteBracketStore::in_memory().await.unwrap();
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
                "k1",
                Some(BracketState::AwaitingPosition),
                BracketState::BracketPending,
                Some("confirmed size 6".to_string()),
            ))
            .await
            .unwrap();

        let trail = store.transitions("k1").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].from, None);
        assert_eq!(trail[1].to, BracketState::BracketPending);
        assert_eq!(trail[1].detail.as_deref(), Some("confirmed size 6"));
    }

    #[tokio::test]
    async fn test_progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("brackets.db").display()
        );

        {
            let store = SqliteBracketStore::connect(&url).await.unwrap();
            let mut record = make_record("k1");
            record.state = BracketState::BracketPending;
            record.stop_loss.mark_placed("sl-42".to_string());
            store.create(&record).await.unwrap();
            store.close().await;
        }

        let reopened = SqliteBracketStore::connect(&url).await.unwrap();
        let found = reopened.get("k1").await.unwrap().unwrap();
        assert!(found.stop_loss.is_placed());
        assert_eq!(found.take_profit.status, LegStatus::Pending);

        let pending = reopened.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
