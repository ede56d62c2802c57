// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Bracket Engine - Rust Core Library
//!
//! Durable bracket-order execution for leveraged derivatives: every filled
//! entry ends up protected by a stop-loss/take-profit pair, or the failure is
//! surfaced loudly enough to act on. The exchange is treated as an unreliable
//! remote service; entry fills and bracket placement are not atomic, so the
//! engine reconciles the venue's actual state before acting and persists
//! every step for crash recovery.
//!
//! # Architecture
//!
//! - **models**: intents, positions, and the durable `BracketRecord`
//! - **engine**: validation, storage, retry scheduling, position
//!   reconciliation, leg placement, and the facade tying them together
//! - **exchange**: the `ExchangeAdapter` boundary (Delta REST adapter and a
//!   scripted mock)
//! - **http**: the caller-facing JSON intake
//!
//! # Lifecycle
//!
//! ```text
//! AwaitingPosition ──> BracketPending ──> BracketPlaced
//!       │                    │       └──> BracketFailed
//!       │                    └──────────> BracketAborted
//!       ├──> EntryRejected
//!       └──> ConfirmationTimedOut
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Engine configuration.
pub mod config;

/// The execution engine: validator, store, reconciler, placer, retry.
pub mod engine;

/// Exchange gateway boundary.
pub mod exchange;

/// Caller-facing HTTP intake.
pub mod http;

/// Core data model.
pub mod models;

/// Tracing setup.
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::{
    BracketEngine, BracketStore, EngineError, EngineOptions, InMemoryBracketStore, RetryPolicy,
    SqliteBracketStore, SubmitAck, ValidationError,
};
pub use exchange::{DeltaCredentials, DeltaExchangeAdapter, ExchangeAdapter, MockExchangeAdapter};
pub use models::{BracketRecord, BracketState, OrderIntent, OrderSide, Position, Protection};
