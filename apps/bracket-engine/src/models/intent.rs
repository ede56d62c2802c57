//! Bracket order intents.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy / long.
    Buy,
    /// Sell / short.
    Sell,
}

impl OrderSide {
    /// The opposing side (used for reduce-only bracket legs).
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire representation of the side.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable bracket order request.
///
/// One intent describes an entry order plus the stop-loss/take-profit pair
/// that must protect the resulting position. The `idempotency_key` is the
/// caller-supplied identity that makes repeated submission safe: the engine
/// acts on a given key at most once.
///
/// `entry_price: None` means a market entry; the price-ordering invariant is
/// then checked stop-vs-target only, and logged against the actual fill price
/// once the position is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Instrument symbol (e.g. `BTCUSD`).
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Requested size in contracts.
    pub size: Decimal,
    /// Entry limit price, or `None` for a market entry.
    pub entry_price: Option<Decimal>,
    /// Stop-loss trigger price.
    pub stop_loss_price: Decimal,
    /// Take-profit trigger price.
    pub take_profit_price: Decimal,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
}

impl OrderIntent {
    /// Whether this intent enters at market rather than a limit price.
    #[must_use]
    pub const fn is_market_entry(&self) -> bool {
        self.entry_price.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_side_serde_lowercase() {
        let json = serde_json::to_string(&OrderSide::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let side: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
    }

    #[test]
    fn test_intent_roundtrip() {
        let intent = OrderIntent {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(3),
            entry_price: Some(dec!(103890)),
            stop_loss_price: dec!(101000),
            take_profit_price: dec!(107800),
            idempotency_key: "order-abc".to_string(),
        };

        let json = serde_json::to_string(&intent).unwrap();
        let parsed: OrderIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, intent);
        assert!(!parsed.is_market_entry());
    }
}
