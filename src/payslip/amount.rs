// src/payslip/amount.rs

use super::normalize::normalize;
use thiserror::Error;

/// Why a token could not be turned into an amount. Both variants are local:
/// the caller skips the token and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("no digits in amount token {0:?}")]
    InvalidAmount(String),
    #[error("amount token {0:?} exceeds 9 digits")]
    Overflow(String),
}

/// Quantity suffixes, longest first so that 回数 wins over 回.
pub const QUANTITY_UNITS: &[&str] = &["時間", "回数", "日", "人", "回", "週"];

/// Payslip amounts never reach a billion yen.
const MAX_DIGITS: usize = 9;

/// Largest magnitude an amount may have, from any source.
pub const MAX_AMOUNT: i64 = 999_999_999;

const NEGATIVE_MARKS: &[char] = &['-', '−', '△', '▲'];

/// A resolved numeric token. `unit` is set when a quantity suffix was
/// stripped; routing decides whether that makes it an attendance figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub value: i64,
    pub unit: Option<&'static str>,
}

impl Resolved {
    pub fn is_quantity(&self) -> bool {
        self.unit.is_some()
    }
}

/// Reject a value that did not come from a token, such as a number in a
/// model's JSON, when it is outside the amount range.
pub fn check_range(value: i64) -> Result<i64, AmountError> {
    if value.unsigned_abs() > MAX_AMOUNT as u64 {
        return Err(AmountError::Overflow(value.to_string()));
    }
    Ok(value)
}

/// Resolve a token to a signed integer, discarding any unit information.
pub fn resolve_amount(token: &str) -> Result<i64, AmountError> {
    resolve(token).map(|r| r.value)
}

/// Resolve a token such as `12,860`, `(2,460)`, `△500`, `21日`.
pub fn resolve(token: &str) -> Result<Resolved, AmountError> {
    let normalized = normalize(token);
    let mut s = normalized.trim();

    let mut unit = None;
    for u in QUANTITY_UNITS {
        if let Some(rest) = s.strip_suffix(u) {
            unit = Some(*u);
            s = rest.trim_end();
            break;
        }
    }
    if unit.is_none() {
        s = s.strip_suffix('円').unwrap_or(s).trim_end();
    }

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = s.strip_prefix(NEGATIVE_MARKS) {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    let digits: String = s.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidAmount(token.to_string()));
    }
    if digits.len() > MAX_DIGITS {
        return Err(AmountError::Overflow(token.to_string()));
    }

    let magnitude: i64 = digits
        .parse()
        .map_err(|_| AmountError::InvalidAmount(token.to_string()))?;

    Ok(Resolved {
        value: if negative { -magnitude } else { magnitude },
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_variants() {
        assert_eq!(resolve_amount("(2,460)"), Ok(-2460));
        assert_eq!(resolve_amount("+12,860"), Ok(12860));
        assert_eq!(resolve_amount("－500"), Ok(-500));
        assert_eq!(resolve_amount("−500"), Ok(-500));
        assert_eq!(resolve_amount("△1,200"), Ok(-1200));
        assert_eq!(resolve_amount("▲30"), Ok(-30));
        assert_eq!(resolve_amount("（２，４６０）"), Ok(-2460));
    }

    #[test]
    fn test_plain_and_currency() {
        assert_eq!(resolve_amount("269000"), Ok(269000));
        assert_eq!(resolve_amount("￥269,000"), Ok(269000));
        assert_eq!(resolve_amount("300円"), Ok(300));
        assert_eq!(resolve_amount("0"), Ok(0));
    }

    #[test]
    fn test_quantity_units() {
        assert_eq!(
            resolve("21日"),
            Ok(Resolved {
                value: 21,
                unit: Some("日")
            })
        );
        assert_eq!(resolve("12時間").map(|r| r.unit), Ok(Some("時間")));
        assert_eq!(resolve("3回数").map(|r| r.unit), Ok(Some("回数")));
        assert_eq!(resolve("3回").map(|r| r.value), Ok(3));
        assert!(!resolve("1,000").unwrap().is_quantity());
    }

    #[test]
    fn test_overflow() {
        assert_eq!(
            resolve_amount("12345678901"),
            Err(AmountError::Overflow("12345678901".to_string()))
        );
        assert_eq!(resolve_amount("999,999,999"), Ok(999_999_999));
        assert!(matches!(
            resolve_amount("1,000,000,000"),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(
            resolve_amount("日"),
            Err(AmountError::InvalidAmount("日".to_string()))
        );
        assert!(matches!(resolve_amount(""), Err(AmountError::InvalidAmount(_))));
        assert!(matches!(resolve_amount("基本給"), Err(AmountError::InvalidAmount(_))));
        assert!(matches!(resolve_amount("2024/04"), Err(AmountError::InvalidAmount(_))));
        assert!(matches!(resolve_amount("()"), Err(AmountError::InvalidAmount(_))));
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range(-999_999_999), Ok(-999_999_999));
        assert_eq!(
            check_range(12_345_678_901),
            Err(AmountError::Overflow("12345678901".to_string()))
        );
        assert!(check_range(i64::MIN).is_err());
    }
}
