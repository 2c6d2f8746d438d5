//! Decimal-string ⇄ base-unit ("wei") conversion.
//!
//! All balance arithmetic in this crate runs on integer base units; the
//! conversions here live at the message boundary and nowhere else.

use alloy::primitives::U256;
use once_cell::sync::Lazy;
use thiserror::Error;

pub static WEI_PER_ETH: Lazy<U256> = Lazy::new(|| U256::from(10u64).pow(U256::from(18u64)));

const MAX_FRACTIONAL_DIGITS: usize = 18;
/// Digit strings at least this long are interpreted as raw wei, not ether.
const RAW_WEI_MIN_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("bad amount: {0:?}")]
    BadAmount(String),
}

/// Parses a display amount into wei.
///
/// Accepted forms: a decimal string with up to 18 fractional digits
/// (`"0.001"`), a bare integer treated as whole ether (`"2"`), or an
/// already-integer wei string when it has no decimal point and more than
/// ten digits (`"12345678901"`).
pub fn to_wei(input: &str) -> Result<U256, AmountError> {
    let s = input.trim();
    let bad = || AmountError::BadAmount(input.to_string());
    if s.is_empty() {
        return Err(bad());
    }
    match s.split_once('.') {
        Some((int_part, frac_part)) => {
            if int_part.is_empty()
                || frac_part.is_empty()
                || frac_part.len() > MAX_FRACTIONAL_DIGITS
                || !int_part.bytes().all(|b| b.is_ascii_digit())
                || !frac_part.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(bad());
            }
            let int = U256::from_str_radix(int_part, 10).map_err(|_| bad())?;
            let frac = U256::from_str_radix(frac_part, 10).map_err(|_| bad())?;
            let scale =
                U256::from(10u64).pow(U256::from((MAX_FRACTIONAL_DIGITS - frac_part.len()) as u64));
            int.checked_mul(*WEI_PER_ETH)
                .and_then(|v| v.checked_add(frac * scale))
                .ok_or_else(bad)
        }
        None => {
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let value = U256::from_str_radix(s, 10).map_err(|_| bad())?;
            if s.len() >= RAW_WEI_MIN_LEN {
                Ok(value)
            } else {
                value.checked_mul(*WEI_PER_ETH).ok_or_else(bad)
            }
        }
    }
}

/// Renders wei as a decimal-ether string. Display only.
pub fn to_decimal(wei: U256) -> String {
    let int = wei / *WEI_PER_ETH;
    let frac = wei % *WEI_PER_ETH;
    if frac.is_zero() {
        let int_str = int.to_string();
        // A bare digit string this long would re-parse as raw wei; keep the
        // decimal point so the round trip stays the identity.
        if int_str.len() >= RAW_WEI_MIN_LEN {
            format!("{int_str}.0")
        } else {
            int_str
        }
    } else {
        let frac_str = format!("{frac:0>18}");
        format!("{}.{}", int, frac_str.trim_end_matches('0'))
    }
}
