//! Order intent validation.
//!
//! Every intent is validated before anything touches storage or the network.
//! The price-ordering check is the one that makes a stop-loss above entry on
//! a long structurally impossible downstream: the exact shape of order that
//! must never reach the exchange.

use rust_decimal::Decimal;

use crate::models::{OrderIntent, OrderSide};

/// Validation failure kinds.
///
/// Client mistakes, never retried, never sent to the exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Requested size must be strictly positive.
    #[error("size must be positive")]
    NonPositiveSize,

    /// The stop/entry/target ordering is wrong for the side.
    #[error("invalid price order: {0}")]
    InvalidPriceOrder(String),

    /// A live (non-terminal) bracket already holds this idempotency key with
    /// a different intent.
    #[error("idempotency key already in use: {0}")]
    DuplicateKey(String),
}

/// An intent that passed validation.
///
/// The only way to obtain one is through [`validate`], so downstream code can
/// rely on the invariants holding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntent {
    intent: OrderIntent,
}

impl ValidatedIntent {
    /// Borrow the underlying intent.
    #[must_use]
    pub const fn intent(&self) -> &OrderIntent {
        &self.intent
    }

    /// Consume the wrapper.
    #[must_use]
    pub fn into_inner(self) -> OrderIntent {
        self.intent
    }
}

/// Validate an order intent.
///
/// Checks, in order: required fields present, `size > 0`, price ordering for
/// the side, idempotency key non-empty. No storage or network side effects.
///
/// # Errors
///
/// Returns the first failed check as a [`ValidationError`].
pub fn validate(intent: OrderIntent) -> Result<ValidatedIntent, ValidationError> {
    if intent.symbol.trim().is_empty() {
        return Err(ValidationError::MissingField("symbol"));
    }

    if intent.size <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveSize);
    }

    if intent.stop_loss_price <= Decimal::ZERO {
        return Err(ValidationError::InvalidPriceOrder(
            "stop loss price must be positive".to_string(),
        ));
    }
    if intent.take_profit_price <= Decimal::ZERO {
        return Err(ValidationError::InvalidPriceOrder(
            "take profit price must be positive".to_string(),
        ));
    }
    if let Some(entry) = intent.entry_price {
        if entry <= Decimal::ZERO {
            return Err(ValidationError::InvalidPriceOrder(
                "entry price must be positive".to_string(),
            ));
        }
    }

    check_price_order(
        intent.side,
        intent.stop_loss_price,
        intent.entry_price,
        intent.take_profit_price,
    )?;

    if intent.idempotency_key.trim().is_empty() {
        return Err(ValidationError::MissingField("idempotency_key"));
    }

    Ok(ValidatedIntent { intent })
}

/// Check the stop/entry/target ordering invariant for a side.
///
/// For buys: `stop < entry < target`; for sells the inequalities invert. When
/// the entry is a market order (`entry = None`) only the stop-vs-target
/// relation can be checked; the full relation is re-checked against the
/// confirmed fill price later.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPriceOrder`] describing the violated
/// relation.
pub fn check_price_order(
    side: OrderSide,
    stop_loss: Decimal,
    entry: Option<Decimal>,
    take_profit: Decimal,
) -> Result<(), ValidationError> {
    match side {
        OrderSide::Buy => {
            if let Some(entry) = entry {
                if stop_loss >= entry {
                    return Err(ValidationError::InvalidPriceOrder(format!(
                        "buy stop loss {stop_loss} must be below entry {entry}"
                    )));
                }
                if take_profit <= entry {
                    return Err(ValidationError::InvalidPriceOrder(format!(
                        "buy take profit {take_profit} must be above entry {entry}"
                    )));
                }
            } else if stop_loss >= take_profit {
                return Err(ValidationError::InvalidPriceOrder(format!(
                    "buy stop loss {stop_loss} must be below take profit {take_profit}"
                )));
            }
        }
        OrderSide::Sell => {
            if let Some(entry) = entry {
                if stop_loss <= entry {
                    return Err(ValidationError::InvalidPriceOrder(format!(
                        "sell stop loss {stop_loss} must be above entry {entry}"
                    )));
                }
                if take_profit >= entry {
                    return Err(ValidationError::InvalidPriceOrder(format!(
                        "sell take profit {take_profit} must be below entry {entry}"
                    )));
                }
            } else if stop_loss <= take_profit {
                return Err(ValidationError::InvalidPriceOrder(format!(
                    "sell stop loss {stop_loss} must be above take profit {take_profit}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn buy_intent(stop: Decimal, entry: Decimal, target: Decimal) -> OrderIntent {
        OrderIntent {
            symbol: "BTCUSD".to_string(),
            side: OrderSide::Buy,
            size: dec!(3),
            entry_price: Some(entry),
            stop_loss_price: stop,
            take_profit_price: target,
            idempotency_key: "key-1".to_string(),
        }
    }

    #[test]
    fn test_incident_values_rejected() {
        // The stop above entry on a long that slipped through in production.
        let intent = buy_intent(dec!(106300), dec!(103890), dec!(107800));
        assert!(matches!(
            validate(intent),
            Err(ValidationError::InvalidPriceOrder(_))
        ));
    }

    #[test]
    fn test_incident_values_corrected_accepted() {
        let intent = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        let validated = validate(intent).unwrap();
        assert_eq!(validated.intent().stop_loss_price, dec!(101000));
    }

    #[test]
    fn test_sell_ordering_inverts() {
        let mut intent = buy_intent(dec!(106300), dec!(103890), dec!(101000));
        intent.side = OrderSide::Sell;
        assert!(validate(intent).is_ok());

        let mut bad = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        bad.side = OrderSide::Sell;
        assert!(matches!(
            validate(bad),
            Err(ValidationError::InvalidPriceOrder(_))
        ));
    }

    #[test]
    fn test_market_entry_checks_stop_vs_target() {
        let mut intent = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        intent.entry_price = None;
        assert!(validate(intent).is_ok());

        let mut inverted = buy_intent(dec!(107800), dec!(103890), dec!(101000));
        inverted.entry_price = None;
        assert!(matches!(
            validate(inverted),
            Err(ValidationError::InvalidPriceOrder(_))
        ));
    }

    #[test]
    fn test_missing_symbol() {
        let mut intent = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        intent.symbol = "  ".to_string();
        assert_eq!(
            validate(intent),
            Err(ValidationError::MissingField("symbol"))
        );
    }

    #[test]
    fn test_empty_idempotency_key() {
        let mut intent = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        intent.idempotency_key = String::new();
        assert_eq!(
            validate(intent),
            Err(ValidationError::MissingField("idempotency_key"))
        );
    }

    #[test_case(dec!(0) ; "zero size")]
    #[test_case(dec!(-3) ; "negative size")]
    fn test_non_positive_size(size: Decimal) {
        let mut intent = buy_intent(dec!(101000), dec!(103890), dec!(107800));
        intent.size = size;
        assert_eq!(validate(intent), Err(ValidationError::NonPositiveSize));
    }

    #[test]
    fn test_equal_stop_and_entry_rejected() {
        let intent = buy_intent(dec!(103890), dec!(103890), dec!(107800));
        assert!(matches!(
            validate(intent),
            Err(ValidationError::InvalidPriceOrder(_))
        ));
    }

    #[test]
    fn test_non_positive_prices_rejected() {
        let intent = buy_intent(dec!(0), dec!(103890), dec!(107800));
        assert!(matches!(
            validate(intent),
            Err(ValidationError::InvalidPriceOrder(_))
        ));
    }

    proptest! {
        /// A buy intent is accepted exactly when stop < entry < target.
        #[test]
        fn prop_buy_ordering(stop in 1i64..200_000, entry in 1i64..200_000, target in 1i64..200_000) {
            let intent = buy_intent(
                Decimal::from(stop),
                Decimal::from(entry),
                Decimal::from(target),
            );
            let accepted = validate(intent).is_ok();
            prop_assert_eq!(accepted, stop < entry && entry < target);
        }
    }
}
