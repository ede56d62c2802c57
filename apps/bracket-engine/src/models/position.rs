//! Exchange-reported positions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// A position as reported by the exchange.
///
/// Owned by the exchange and read-only to the engine: the engine never
/// fabricates or mutates one, it only reconciles against it. A size of zero
/// means the position is closed and terminates any pending bracket work for
/// the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol.
    pub symbol: String,
    /// Position side.
    pub side: OrderSide,
    /// Absolute position size in contracts.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Liquidation price, when the venue reports one.
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    /// Whether the position is open (nonzero size).
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    /// Whether this position can be protected by a bracket for `side`.
    #[must_use]
    pub fn matches(&self, side: OrderSide) -> bool {
        self.is_open() && self.side == side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_long(size: Decimal) -> Position {
        Position {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size,
            entry_price: dec!(103890),
            liquidation_price: Some(dec!(98000)),
        }
    }

    #[test]
    fn test_zero_size_is_closed() {
        assert!(!btc_long(dec!(0)).is_open());
        assert!(btc_long(dec!(6)).is_open());
    }

    #[test]
    fn test_matches_requires_open_and_side() {
        assert!(btc_long(dec!(6)).matches(OrderSide::Buy));
        assert!(!btc_long(dec!(6)).matches(OrderSide::Sell));
        assert!(!btc_long(dec!(0)).matches(OrderSide::Buy));
    }
}
