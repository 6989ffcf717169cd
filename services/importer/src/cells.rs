//! Cell normalization shared by every sheet parser.
//!
//! Spreadsheet exports mix typed numbers, currency-formatted text, merged
//! (empty) cells and error cells. These helpers turn a raw `calamine::Data`
//! into the handful of shapes the parsers care about.

use calamine::Data;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Text that stands for "no value" once currency noise is stripped.
const MISSING_MARKER: &str = "nan";

/// 10^18, the first magnitude a `NUMERIC(20,2)` column cannot hold.
pub const STORED_AMOUNT_LIMIT: Decimal = Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0);

/// Normalize a monetary cell.
///
/// Returns `None` for blank/missing cells and `Some(0)` for anything that is
/// present but cannot be read as a number. Never panics.
pub fn clean_amount(cell: &Data) -> Option<Decimal> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::Int(i) => Some(Decimal::from(*i)),
        Data::Float(f) if f.is_nan() => None,
        Data::Float(f) => Some(f64_to_decimal(*f)),
        Data::String(s) => clean_amount_text(s),
        _ => Some(Decimal::ZERO),
    }
}

fn clean_amount_text(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(MISSING_MARKER) {
        return None;
    }

    let value = Decimal::from_str(&cleaned).ok().or_else(|| {
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(f64_to_decimal)
    });
    Some(value.unwrap_or(Decimal::ZERO))
}

/// Convert f64 to Decimal through its shortest textual form so that
/// 0.1 stays 0.1 instead of 0.1000000000000000055...
fn f64_to_decimal(f: f64) -> Decimal {
    let s = format!("{}", f);
    s.parse::<Decimal>()
        .or_else(|_| Decimal::try_from(f))
        .unwrap_or(Decimal::ZERO)
}

/// True when `amount`, rounded to cents, fits a money column.
pub fn is_storable(amount: &Decimal) -> bool {
    amount.round_dp(2).abs() < STORED_AMOUNT_LIMIT
}

/// Trimmed text of a cell, `None` when the cell is blank.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::Float(f) if f.is_nan() => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        other => Some(other.to_string()),
    }
}

pub fn is_blank(cell: &Data) -> bool {
    cell_text(cell).is_none()
}

/// A whole, non-negative number of months read from a numeric or
/// numeric-looking text cell. Fractions are truncated.
pub fn cell_months(cell: &Data) -> Option<u32> {
    let value = match cell {
        Data::Int(i) => *i as f64,
        Data::Float(f) => *f,
        Data::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };

    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return None;
    }
    Some(value.trunc() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    // -------------------------------------------------------------------------
    // AMOUNT CLEANING
    // -------------------------------------------------------------------------

    #[test]
    fn test_clean_amount_currency_string() {
        assert_eq!(clean_amount(&text("$1,234.50")), Some(dec!(1234.50)));
        assert_eq!(clean_amount(&text(" $ 12,000,000 ")), Some(dec!(12000000)));
    }

    #[test]
    fn test_clean_amount_blank_is_none() {
        assert_eq!(clean_amount(&text("  ")), None);
        assert_eq!(clean_amount(&text("$")), None);
        assert_eq!(clean_amount(&Data::Empty), None);
        assert_eq!(clean_amount(&Data::Float(f64::NAN)), None);
        assert_eq!(clean_amount(&text("NaN")), None);
    }

    #[test]
    fn test_clean_amount_garbage_is_zero() {
        assert_eq!(clean_amount(&text("N/A")), Some(Decimal::ZERO));
        assert_eq!(clean_amount(&text("pendiente")), Some(Decimal::ZERO));
        assert_eq!(clean_amount(&Data::Bool(true)), Some(Decimal::ZERO));
    }

    #[test]
    fn test_clean_amount_numeric_cells() {
        assert_eq!(clean_amount(&Data::Int(42)), Some(dec!(42)));
        assert_eq!(clean_amount(&Data::Float(1500000.0)), Some(dec!(1500000)));
        assert_eq!(clean_amount(&Data::Float(0.1)), Some(dec!(0.1)));
        assert_eq!(clean_amount(&Data::Float(f64::INFINITY)), Some(Decimal::ZERO));
    }

    #[test]
    fn test_clean_amount_scientific_and_negative() {
        assert_eq!(clean_amount(&text("1e3")), Some(dec!(1000)));
        assert_eq!(clean_amount(&text("-5")), Some(dec!(-5)));
    }

    #[test]
    fn test_clean_amount_never_panics_on_odd_input() {
        for raw in ["$$$", ",,,", "1.2.3", "∞", "١٢٣", "$-", "--1", "1e99999"] {
            let _ = clean_amount(&text(raw));
        }
    }

    #[test]
    fn test_storable_amounts() {
        assert_eq!(STORED_AMOUNT_LIMIT, dec!(1000000000000000000));
        assert!(is_storable(&dec!(999999999999999999.99)));
        assert!(is_storable(&dec!(-999999999999999999.99)));
        assert!(!is_storable(&dec!(1000000000000000000)));
        assert!(!is_storable(&dec!(999999999999999999.996)));
        assert!(!is_storable(&clean_amount(&text("1e20")).unwrap()));
    }

    // -------------------------------------------------------------------------
    // TEXT AND MONTH HELPERS
    // -------------------------------------------------------------------------

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&text("  Personal  ")), Some("Personal".to_string()));
        assert_eq!(cell_text(&text("   ")), None);
        assert_eq!(cell_text(&Data::Float(3.0)), Some("3".to_string()));
        assert_eq!(cell_text(&Data::Float(1.5)), Some("1.5".to_string()));
        assert_eq!(cell_text(&Data::Int(7)), Some("7".to_string()));
        assert!(is_blank(&Data::Empty));
    }

    #[test]
    fn test_cell_months() {
        assert_eq!(cell_months(&Data::Float(3.0)), Some(3));
        assert_eq!(cell_months(&Data::Int(12)), Some(12));
        assert_eq!(cell_months(&text(" 4 ")), Some(4));
        assert_eq!(cell_months(&Data::Float(2.7)), Some(2));
        assert_eq!(cell_months(&Data::Float(-1.0)), None);
        assert_eq!(cell_months(&text("tres")), None);
        assert_eq!(cell_months(&Data::Empty), None);
    }
}
