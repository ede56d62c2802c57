//! Exchange adapter trait definition.

use async_trait::async_trait;

use crate::models::Position;

use super::{ExchangeError, ExchangeOrderStatus, OrderAck, OrderRequest};

/// Trait for exchange integrations.
///
/// The engine treats the exchange as an unreliable remote service: every call
/// can fail, time out, or succeed without the caller learning about it. All
/// methods must therefore be safe to call again; the engine tracks its own
/// order ids and never relies on the venue deduplicating submissions.
///
/// Credentials are injected into the adapter at construction time; nothing is
/// read from ambient or global state, so the engine runs unchanged against a
/// fake adapter in tests.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Submit a single order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails in transport, is rate limited,
    /// or is rejected by the venue.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Query the current status of an order by exchange order id.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is unknown or the request fails.
    async fn get_order_status(
        &self,
        order_id: &str,
    ) -> Result<ExchangeOrderStatus, ExchangeError>;

    /// Fetch the open position for a symbol, `None` when flat.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError>;

    /// Cancel an order. Cancellation is best-effort: the order may already be
    /// filled or gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the cancel request itself fails.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Venue name for logging.
    fn name(&self) -> &'static str;

    /// Lightweight connectivity/credential check.
    ///
    /// # Errors
    ///
    /// Returns an error if the venue is unreachable or rejects the
    /// credentials.
    async fn health_check(&self) -> Result<(), ExchangeError>;
}
