//! Tenant markup pricing.
//!
//! Pricing is a pure function over exact decimal amounts. The customer-facing unit price is the
//! operator's base price plus the tenant's markup; the markup is the tenant's profit per unit and
//! is what lands in the ledger when the order is credited.
use serde::{Deserialize, Serialize};
use spg_common::TokenAmount;

use crate::{db_types::MarkupKind, traits::StorefrontError};

/// The per-unit result of applying a tenant's markup to a base price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Price the customer is charged per unit.
    pub unit_price: TokenAmount,
    /// Tenant profit per unit, `unit_price - base_price`.
    pub markup: TokenAmount,
}

/// Applies a markup to the operator's base price.
///
/// A percent markup of `value` yields `base * value / 100`, computed in i128 and rounded half
/// away from zero at the 8th decimal. A fixed markup adds `value` outright. Markup values are
/// validated non-negative when tenant settings are updated, not here.
pub fn quote(base_price: TokenAmount, kind: MarkupKind, value: TokenAmount) -> Result<PriceQuote, StorefrontError> {
    let markup = match kind {
        MarkupKind::Percent => base_price
            .percent_of(value)
            .ok_or_else(|| StorefrontError::InvalidMarkup(format!("{value} percent of {base_price} overflows")))?,
        MarkupKind::Fixed => value,
    };
    let unit_price = base_price
        .checked_add(markup)
        .ok_or_else(|| StorefrontError::InvalidMarkup(format!("{base_price} plus {markup} overflows")))?;
    Ok(PriceQuote { unit_price, markup })
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn fixed_markup() {
        let base = TokenAmount::from_tokens(100);
        let q = quote(base, MarkupKind::Fixed, TokenAmount::from_tokens(10)).unwrap();
        assert_eq!(q.unit_price, TokenAmount::from_tokens(110));
        assert_eq!(q.markup, TokenAmount::from_tokens(10));
    }

    #[test]
    fn percent_markup() {
        let base = TokenAmount::from_tokens(100);
        let q = quote(base, MarkupKind::Percent, TokenAmount::from_str("2.5").unwrap()).unwrap();
        assert_eq!(q.unit_price, TokenAmount::from_str("102.5").unwrap());
        assert_eq!(q.markup, TokenAmount::from_str("2.5").unwrap());
    }

    #[test]
    fn percent_rounds_half_up_at_the_eighth_decimal() {
        // 0.00000003 * 50% = 0.000000015, which rounds to 0.00000002
        let base = TokenAmount::from(3);
        let q = quote(base, MarkupKind::Percent, TokenAmount::from_tokens(50)).unwrap();
        assert_eq!(q.markup, TokenAmount::from(2));
        assert_eq!(q.unit_price, TokenAmount::from(5));
    }

    #[test]
    fn zero_markup_leaves_the_base_price() {
        let base = TokenAmount::from_str("19.99").unwrap();
        let q = quote(base, MarkupKind::Percent, TokenAmount::default()).unwrap();
        assert_eq!(q.unit_price, base);
        assert!(q.markup.is_zero());
        let q = quote(base, MarkupKind::Fixed, TokenAmount::default()).unwrap();
        assert_eq!(q.unit_price, base);
    }

    #[test]
    fn overflow_is_an_error() {
        let base = TokenAmount::from(i64::MAX);
        assert!(quote(base, MarkupKind::Fixed, TokenAmount::from_tokens(1)).is_err());
    }
}
