//! Mock exchange adapter for testing.
//!
//! Returns scripted responses without any network calls. Responses are
//! consumed from per-method queues; when a queue is empty a configurable
//! steady-state answer is used instead. Every call is counted and every
//! placed order captured, so tests can assert exactly how many submissions
//! reached the "exchange".

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::models::Position;

use super::adapter::ExchangeAdapter;
use super::types::{ExchangeError, ExchangeOrderStatus, OrderAck, OrderRequest};

/// Scripted mock implementation of [`ExchangeAdapter`].
#[derive(Debug, Default)]
pub struct MockExchangeAdapter {
    order_counter: AtomicU64,
    place_calls: AtomicU32,
    position_calls: AtomicU32,
    status_calls: AtomicU32,
    cancel_calls: AtomicU32,
    place_results: Mutex<VecDeque<Result<OrderAck, ExchangeError>>>,
    position_results: Mutex<VecDeque<Result<Option<Position>, ExchangeError>>>,
    status_results: Mutex<VecDeque<Result<ExchangeOrderStatus, ExchangeError>>>,
    steady_position: Mutex<Option<Position>>,
    placed: Mutex<Vec<OrderRequest>>,
}

impl MockExchangeAdapter {
    /// Create a mock with empty queues and no position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the steady-state position returned when the position queue is
    /// empty.
    pub fn set_position(&self, position: Option<Position>) {
        *self.steady_position.lock().unwrap() = position;
    }

    /// Queue a one-shot position response (consumed before the steady state).
    pub fn queue_position(&self, result: Result<Option<Position>, ExchangeError>) {
        self.position_results.lock().unwrap().push_back(result);
    }

    /// Queue a one-shot order placement response.
    pub fn queue_place(&self, result: Result<OrderAck, ExchangeError>) {
        self.place_results.lock().unwrap().push_back(result);
    }

    /// Queue a successful placement with an auto-assigned order id.
    pub fn queue_place_ok(&self) {
        let id = self.next_order_id();
        self.queue_place(Ok(OrderAck {
            order_id: id,
            status: ExchangeOrderStatus::Open,
        }));
    }

    /// Queue a one-shot order status response.
    pub fn queue_order_status(&self, result: Result<ExchangeOrderStatus, ExchangeError>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    /// Number of `place_order` calls observed.
    pub fn place_calls(&self) -> u32 {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_position` calls observed.
    pub fn position_calls(&self) -> u32 {
        self.position_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_order_status` calls observed.
    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `cancel_order` calls observed.
    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// All order requests that reached the mock, in submission order.
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    fn next_order_id(&self) -> String {
        let id = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("mock-{id}")
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        self.placed.lock().unwrap().push(request.clone());

        if let Some(result) = self.place_results.lock().unwrap().pop_front() {
            return result;
        }

        Ok(OrderAck {
            order_id: self.next_order_id(),
            status: ExchangeOrderStatus::Open,
        })
    }

    async fn get_order_status(
        &self,
        _order_id: &str,
    ) -> Result<ExchangeOrderStatus, ExchangeError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(result) = self.status_results.lock().unwrap().pop_front() {
            return result;
        }

        Ok(ExchangeOrderStatus::Open)
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<Position>, ExchangeError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(result) = self.position_results.lock().unwrap().pop_front() {
            return result;
        }

        Ok(self.steady_position.lock().unwrap().clone())
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), ExchangeError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn btc_long() -> Position {
        Position {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            entry_price: dec!(103890),
            liquidation_price: None,
        }
    }

    #[tokio::test]
    async fn test_queue_consumed_before_steady_state() {
        let mock = MockExchangeAdapter::new();
        mock.set_position(Some(btc_long()));
        mock.queue_position(Ok(None));

        assert!(mock.get_position("BTCUSD").await.unwrap().is_none());
        assert!(mock.get_position("BTCUSD").await.unwrap().is_some());
        assert_eq!(mock.position_calls(), 2);
    }

    #[tokio::test]
    async fn test_default_place_assigns_sequential_ids() {
        let mock = MockExchangeAdapter::new();
        let request = OrderRequest::market("BTCUSD".to_string(), OrderSide::Buy, dec!(1));

        let first = mock.place_order(&request).await.unwrap();
        let second = mock.place_order(&request).await.unwrap();

        assert_eq!(first.order_id, "mock-1");
        assert_eq!(second.order_id, "mock-2");
        assert_eq!(mock.place_calls(), 2);
        assert_eq!(mock.placed_orders().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_place_error() {
        let mock = MockExchangeAdapter::new();
        mock.queue_place(Err(ExchangeError::Rejected {
            code: "insufficient_margin".to_string(),
            message: String::new(),
        }));

        let request = OrderRequest::market("BTCUSD".to_string(), OrderSide::Buy, dec!(1));
        let err = mock.place_order(&request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { .. }));
    }
}
