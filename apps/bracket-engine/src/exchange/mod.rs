//! Exchange gateway boundary.
//!
//! The engine talks to the venue exclusively through the [`ExchangeAdapter`]
//! trait. The trait is deliberately small (place, query, cancel) and every
//! call is assumed to be retry-safe but not idempotent on the venue side.
//!
//! # Module Structure
//!
//! - [`adapter`]: the `ExchangeAdapter` trait
//! - [`types`]: order requests/acks and the `ExchangeError` taxonomy
//! - [`delta`]: signed REST adapter for Delta Exchange
//! - [`mock`]: scripted adapter for tests

mod adapter;
pub mod delta;
mod mock;
mod types;

pub use adapter::ExchangeAdapter;
pub use delta::{DeltaCredentials, DeltaExchangeAdapter};
pub use mock::MockExchangeAdapter;
pub use types::{ExchangeError, ExchangeOrderStatus, OrderAck, OrderRequest, OrderType};
