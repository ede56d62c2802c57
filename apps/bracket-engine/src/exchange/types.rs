//! Order types and error taxonomy for the exchange boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

/// Exchange order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Immediate execution at market.
    Market,
    /// Rest at a limit price.
    Limit,
    /// Trigger order: rests until `stop_price` trades, then becomes a limit
    /// order at `limit_price`. Used for both bracket legs.
    StopTrigger,
}

/// A single order submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Size in contracts.
    pub size: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price (limit and stop-trigger orders).
    pub limit_price: Option<Decimal>,
    /// Trigger price (stop-trigger orders).
    pub stop_price: Option<Decimal>,
    /// Reduce-only orders can only shrink an existing position. Always set
    /// for bracket legs so a leg can never open fresh exposure.
    pub reduce_only: bool,
    /// Client-assigned order id, echoed back by the venue.
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// A market entry order.
    #[must_use]
    pub const fn market(symbol: String, side: OrderSide, size: Decimal) -> Self {
        Self {
            symbol,
            side,
            size,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// A limit entry order.
    #[must_use]
    pub const fn limit(symbol: String, side: OrderSide, size: Decimal, price: Decimal) -> Self {
        Self {
            symbol,
            side,
            size,
            order_type: OrderType::Limit,
            limit_price: Some(price),
            stop_price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// A reduce-only trigger order for a bracket leg. Trigger and limit price
    /// are the same so the leg executes as soon as it fires.
    #[must_use]
    pub const fn reduce_only_trigger(
        symbol: String,
        side: OrderSide,
        size: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol,
            side,
            size,
            order_type: OrderType::StopTrigger,
            limit_price: Some(trigger_price),
            stop_price: Some(trigger_price),
            reduce_only: true,
            client_order_id: None,
        }
    }

    /// Attach a client order id.
    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// Acknowledgment returned by the exchange for a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Exchange-assigned order id.
    pub order_id: String,
    /// Status at acknowledgment time.
    pub status: ExchangeOrderStatus,
}

/// Exchange-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOrderStatus {
    /// Resting on the book (or pending trigger).
    Open,
    /// Partially executed.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled before execution.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
    /// Expired unfilled.
    Expired,
}

impl ExchangeOrderStatus {
    /// Whether this status means the order will never fill.
    #[must_use]
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::Expired)
    }
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Errors from exchange operations.
///
/// The variants carry the retry classification implicitly: transport errors,
/// 5xx responses and rate limits are transient; rejections, auth failures and
/// malformed responses are terminal. The actual retry decision is made by the
/// engine's classifier (`engine::retry::classify_exchange`), which is unit
/// tested against every variant.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Network-level failure (connect, DNS, timeout, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The venue answered with a server-side error status.
    #[error("exchange server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// Rate limited by the venue.
    #[error("rate limited")]
    RateLimited {
        /// Seconds the venue asked us to wait, when provided.
        retry_after_secs: Option<u64>,
    },

    /// The venue rejected the request outright (bad price tick, insufficient
    /// margin, invalid parameters). Never retried.
    #[error("order rejected: {code} - {message}")]
    Rejected {
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },

    /// Credentials were refused.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The referenced order does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// The venue answered with a body we could not interpret.
    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
}
