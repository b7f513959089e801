//! Fixed-point conversion between ledger amounts and native chain units.
//!
//! The ledger stores every amount with exactly [`INTERNAL_DECIMALS`]
//! fractional digits. On chain, an asset counts in integer units of
//! `10^-decimals`. Converting is a multiply or divide by
//! `10^|decimals - 8|`; digits beyond the ledger's precision are truncated,
//! never rounded.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits kept by the ledger.
pub const INTERNAL_DECIMALS: u32 = 8;

/// `U256` can hold `10^77` but not `10^78`.
const MAX_DECIMALS: u32 = 77;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    #[error("unsupported decimals: {0}")]
    UnsupportedDecimals(u32),
}

fn scale(exp: u32) -> Result<U256, AmountError> {
    if exp > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(exp));
    }
    Ok(U256::exp10(exp as usize))
}

/// Parse a ledger amount into its integer count of `10^-8` units.
fn parse_internal(amount: &str) -> Result<U256, AmountError> {
    let invalid = || AmountError::InvalidAmount(amount.to_owned());

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((int_part, frac_part)) => {
            if frac_part.is_empty() || frac_part.len() > INTERNAL_DECIMALS as usize {
                return Err(invalid());
            }
            (int_part, frac_part)
        }
        None => (amount, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    let digits = format!(
        "{int_part}{frac_part:0<width$}",
        width = INTERNAL_DECIMALS as usize
    );
    U256::from_dec_str(&digits).map_err(|_| invalid())
}

/// Convert a ledger amount such as `"12.5"` into native units.
pub fn to_native(amount: &str, decimals: u32) -> Result<U256, AmountError> {
    let internal = parse_internal(amount)?;
    if decimals <= INTERNAL_DECIMALS {
        Ok(internal / scale(INTERNAL_DECIMALS - decimals)?)
    } else {
        internal
            .checked_mul(scale(decimals - INTERNAL_DECIMALS)?)
            .ok_or_else(|| AmountError::InvalidAmount(amount.to_owned()))
    }
}

/// Convert native units into a ledger amount string with exactly eight
/// fractional digits.
pub fn to_internal(native: U256, decimals: u32) -> Result<String, AmountError> {
    let internal = if decimals <= INTERNAL_DECIMALS {
        native
            .checked_mul(scale(INTERNAL_DECIMALS - decimals)?)
            .ok_or_else(|| AmountError::InvalidAmount(native.to_string()))?
    } else {
        native / scale(decimals - INTERNAL_DECIMALS)?
    };

    let digits = format!(
        "{:0>width$}",
        internal.to_string(),
        width = INTERNAL_DECIMALS as usize + 1
    );
    let (int_part, frac_part) = digits.split_at(digits.len() - INTERNAL_DECIMALS as usize);
    Ok(format!("{int_part}.{frac_part}"))
}

/// [`to_internal`] for the ledger's NUMERIC columns.
pub fn to_internal_decimal(native: U256, decimals: u32) -> Result<Decimal, AmountError> {
    let text = to_internal(native, decimals)?;
    Decimal::from_str_exact(&text).map_err(|_| AmountError::InvalidAmount(text))
}

/// [`to_native`] for a ledger NUMERIC value.
pub fn decimal_to_native(amount: Decimal, decimals: u32) -> Result<U256, AmountError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AmountError::InvalidAmount(amount.to_string()));
    }
    to_native(&amount.normalize().to_string(), decimals)
}

/// Parse a ledger amount string into a [`Decimal`], validating it the same
/// way [`to_native`] does.
pub fn parse_decimal(amount: &str) -> Result<Decimal, AmountError> {
    parse_internal(amount)?;
    Decimal::from_str(amount).map_err(|_| AmountError::InvalidAmount(amount.to_owned()))
}
