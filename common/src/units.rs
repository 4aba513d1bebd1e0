//! Human readable size and time values.
//!
//! [`parse_unit`] converts strings such as `"4M"`, `"1.5G"`, `"2H"` or `"5min"` into a plain
//! integer. Whether the result is a byte count or a number of seconds is decided solely by
//! the suffix, so callers must know which domain they expect:
//!
//! | suffix                  | factor                     |
//! |-------------------------|----------------------------|
//! | none, `B`               | 1                          |
//! | `K` `M` `G` `T` `P` `E` | powers of 1024 (bytes)     |
//! | `S`                     | 1 (seconds)                |
//! | `MIN`                   | 60                         |
//! | `H`                     | 3600                       |
//! | `D`                     | 86400                      |
//! | `W`                     | 7 days                     |
//! | `MO`                    | 31 days                    |
//! | `Y`                     | 365 days                   |
//!
//! Suffixes are case-insensitive and a byte suffix may be followed by `B` (`"4MB"`).
//! A decimal point switches to floating point parsing, the scaled result is truncated.

const KIB: u64 = 1024;
const DAY: u64 = 86400;

// multi-letter suffixes come first, `MIN` and `MO` would otherwise be taken for `N`/`O`
// garbage after an `M`
const SUFFIXES: &[(&str, u64)] = &[
    ("MIN", 60),
    ("MO", 31 * DAY),
    ("E", KIB * KIB * KIB * KIB * KIB * KIB),
    ("P", KIB * KIB * KIB * KIB * KIB),
    ("T", KIB * KIB * KIB * KIB),
    ("G", KIB * KIB * KIB),
    ("M", KIB * KIB),
    ("K", KIB),
    ("S", 1),
    ("H", 3600),
    ("D", DAY),
    ("W", 7 * DAY),
    ("Y", 365 * DAY),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("empty value")]
    Empty,
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("value {0:?} does not fit into 64 bits")]
    Overflow(String),
}

/// Splits `value` into its numeric part and the scale factor of its suffix.
fn split_suffix(value: &str) -> (&str, u64) {
    let upper = value.to_ascii_uppercase();
    // a trailing B is the byte marker, "4B" and "4MB" are byte values
    let (upper, value) = match upper.strip_suffix('B') {
        Some(stripped) => (stripped.to_string(), &value[..value.len() - 1]),
        None => (upper, value),
    };
    for (suffix, factor) in SUFFIXES {
        if upper.len() > suffix.len() && upper.ends_with(suffix) {
            return (&value[..value.len() - suffix.len()], *factor);
        }
    }
    (value, 1)
}

/// Parses a size or time value with an optional unit suffix.
///
/// # Errors
///
/// Returns [`UnitError::Empty`] for an empty (or all-whitespace) input, and
/// [`UnitError::InvalidNumber`] / [`UnitError::Overflow`] when the numeric part is malformed or
/// the scaled value exceeds `u64`.
///
/// # Examples
///
/// ```
/// use common::units::parse_unit;
///
/// assert_eq!(parse_unit("4M").unwrap(), 4 * 1024 * 1024);
/// assert_eq!(parse_unit("2h").unwrap(), 7200);
/// assert_eq!(parse_unit("5min").unwrap(), 300);
/// ```
pub fn parse_unit(value: &str) -> Result<u64, UnitError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UnitError::Empty);
    }
    let (number, factor) = split_suffix(value);
    let number = number.trim();
    if number.contains('.') {
        let parsed: f64 = number
            .parse()
            .map_err(|_| UnitError::InvalidNumber(value.to_string()))?;
        if !parsed.is_finite() || parsed < 0.0 {
            return Err(UnitError::InvalidNumber(value.to_string()));
        }
        let scaled = parsed * factor as f64;
        if scaled >= u64::MAX as f64 {
            return Err(UnitError::Overflow(value.to_string()));
        }
        return Ok(scaled as u64);
    }
    let parsed: u64 = number
        .parse()
        .map_err(|_| UnitError::InvalidNumber(value.to_string()))?;
    parsed
        .checked_mul(factor)
        .ok_or_else(|| UnitError::Overflow(value.to_string()))
}

/// Parses a time value (see [`parse_unit`]) into a [`std::time::Duration`].
pub fn parse_duration(value: &str) -> Result<std::time::Duration, UnitError> {
    parse_unit(value).map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn byte_suffixes() {
        assert_eq!(parse_unit("17").unwrap(), 17);
        assert_eq!(parse_unit("17B").unwrap(), 17);
        assert_eq!(parse_unit("1K").unwrap(), 1024);
        assert_eq!(parse_unit("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_unit("4mb").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_unit("2G").unwrap(), 2 << 30);
        assert_eq!(parse_unit("3T").unwrap(), 3 << 40);
        assert_eq!(parse_unit("1P").unwrap(), 1 << 50);
        assert_eq!(parse_unit("2E").unwrap(), 2 << 60);
    }

    #[test]
    fn time_suffixes() {
        assert_eq!(parse_unit("10s").unwrap(), 10);
        assert_eq!(parse_unit("5MIN").unwrap(), 300);
        assert_eq!(parse_unit("2H").unwrap(), 7200);
        assert_eq!(parse_unit("1d").unwrap(), 86400);
        assert_eq!(parse_unit("1W").unwrap(), 7 * 86400);
        assert_eq!(parse_unit("2mo").unwrap(), 2 * 31 * 86400);
        assert_eq!(parse_unit("1Y").unwrap(), 365 * 86400);
        assert_eq!(
            parse_duration("1min").unwrap(),
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn multi_letter_suffixes_are_not_confused_with_mebibytes() {
        assert_ne!(parse_unit("1MIN").unwrap(), parse_unit("1M").unwrap());
        assert_ne!(parse_unit("1MO").unwrap(), parse_unit("1M").unwrap());
    }

    #[test]
    fn fractional_values() {
        assert_eq!(parse_unit("1.5K").unwrap(), 1536);
        assert_eq!(parse_unit("0.5H").unwrap(), 1800);
        assert_eq!(parse_unit("2.25").unwrap(), 2);
    }

    #[test]
    fn invalid_values() {
        assert_eq!(parse_unit(""), Err(UnitError::Empty));
        assert_eq!(parse_unit("   "), Err(UnitError::Empty));
        assert!(matches!(parse_unit("M"), Err(UnitError::InvalidNumber(_))));
        assert!(matches!(parse_unit("abc"), Err(UnitError::InvalidNumber(_))));
        assert!(matches!(parse_unit("-4M"), Err(UnitError::InvalidNumber(_))));
        assert!(matches!(parse_unit("1.2.3K"), Err(UnitError::InvalidNumber(_))));
        assert!(matches!(parse_unit("16E"), Err(UnitError::Overflow(_))));
    }

    proptest! {
        #[test]
        fn kibibyte_scaling(n in 0u64..(1u64 << 40)) {
            prop_assert_eq!(parse_unit(&format!("{n}K")).unwrap(), n * 1024);
            prop_assert_eq!(parse_unit(&format!("{n}kB")).unwrap(), n * 1024);
        }
    }
}
