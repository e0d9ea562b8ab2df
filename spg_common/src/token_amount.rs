use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const SETTLEMENT_CURRENCY_CODE: &str = "USDT";
/// Number of decimal places carried by [`TokenAmount`]. On-chain token precision (usually 6 for
/// TRC-20 USDT) is converted up to this resolution on ingestion.
pub const SETTLEMENT_DECIMALS: u32 = 8;

const SCALE: i64 = 100_000_000;

//--------------------------------------    TokenAmount      ---------------------------------------------------------
/// An exact-decimal settlement amount, stored as an integer count of 10^-8 token units.
///
/// All ledger arithmetic happens on this type. There is deliberately no conversion to or from
/// binary floating point.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TokenAmount(i64);

op!(binary TokenAmount, Add, add);
op!(binary TokenAmount, Sub, sub);
op!(inplace TokenAmount, AddAssign, add_assign);
op!(inplace TokenAmount, SubAssign, sub_assign);
op!(unary TokenAmount, Neg, neg);
op!(scalar TokenAmount, Mul, mul, i64);

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a settlement amount: {0}")]
pub struct TokenAmountError(pub String);

impl From<i64> for TokenAmount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for TokenAmount {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for TokenAmount {}

impl TokenAmount {
    /// The raw value in 10^-8 token units.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// An amount of whole tokens, e.g. `from_tokens(10)` is 10 USDT.
    pub fn from_tokens(tokens: i64) -> Self {
        Self(tokens * SCALE)
    }

    /// Converts a raw on-chain integer amount at the given token precision into a settlement
    /// amount. Fails when the value overflows, or when `token_decimals` exceeds
    /// [`SETTLEMENT_DECIMALS`] and the raw value carries sub-resolution precision.
    pub fn from_raw_token(raw: u64, token_decimals: u32) -> Result<Self, TokenAmountError> {
        if token_decimals <= SETTLEMENT_DECIMALS {
            let factor = 10u64.pow(SETTLEMENT_DECIMALS - token_decimals);
            let scaled = raw
                .checked_mul(factor)
                .ok_or_else(|| TokenAmountError(format!("raw amount {raw} overflows at {token_decimals} decimals")))?;
            i64::try_from(scaled)
                .map(Self)
                .map_err(|_| TokenAmountError(format!("raw amount {raw} is too large")))
        } else {
            let divisor = 10u64.pow(token_decimals - SETTLEMENT_DECIMALS);
            if raw % divisor != 0 {
                return Err(TokenAmountError(format!(
                    "raw amount {raw} at {token_decimals} decimals cannot be represented exactly"
                )));
            }
            i64::try_from(raw / divisor)
                .map(Self)
                .map_err(|_| TokenAmountError(format!("raw amount {raw} is too large")))
        }
    }

    /// `self * percent / 100`, rounded half away from zero at the 8th decimal.
    /// `percent` is itself a decimal amount, so 2.5% is `TokenAmount::from_str("2.5")`.
    pub fn percent_of(&self, percent: TokenAmount) -> Option<Self> {
        let num = (self.0 as i128) * (percent.0 as i128);
        let den = 100i128 * SCALE as i128;
        let rounded = (num + num.signum() * den / 2) / den;
        i64::try_from(rounded).ok().map(Self)
    }

    pub fn checked_add(&self, rhs: TokenAmount) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(&self, rhs: TokenAmount) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Scales by a unitless factor (e.g. an order quantity).
    pub fn checked_scale(&self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl TryFrom<u64> for TokenAmount {
    type Error = TokenAmountError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(TokenAmountError(format!("Value {value} is too large to convert to TokenAmount")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / SCALE as u64;
        let mut frac = format!("{:08}", magnitude % SCALE as u64);
        while frac.len() > 2 && frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{sign}{whole}.{frac} {SETTLEMENT_CURRENCY_CODE}")
    }
}

impl FromStr for TokenAmount {
    type Err = TokenAmountError;

    /// Parses a decimal string such as `"10"`, `"2.5"` or `"-0.000001"`. At most 8 decimal places
    /// are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole_str, frac_str) = match digits.split_once('.') {
            Some((w, fr)) => (w, fr),
            None => (digits, ""),
        };
        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(TokenAmountError(format!("'{s}' is not a decimal amount")));
        }
        if !whole_str.bytes().all(|b| b.is_ascii_digit()) || !frac_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountError(format!("'{s}' is not a decimal amount")));
        }
        if frac_str.len() > SETTLEMENT_DECIMALS as usize {
            return Err(TokenAmountError(format!("'{s}' has more than {SETTLEMENT_DECIMALS} decimal places")));
        }
        let whole: i64 = if whole_str.is_empty() {
            0
        } else {
            whole_str.parse().map_err(|_| TokenAmountError(format!("'{s}' is not a decimal amount")))?
        };
        let mut frac: i64 = 0;
        if !frac_str.is_empty() {
            frac = frac_str.parse().map_err(|_| TokenAmountError(format!("'{s}' is not a decimal amount")))?;
            frac *= 10i64.pow(SETTLEMENT_DECIMALS - frac_str.len() as u32);
        }
        let value = whole
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(|| TokenAmountError(format!("'{s}' is out of range")))?;
        Ok(Self(if negative { -value } else { value }))
    }
}
