//! Budget matrix parser.
//!
//! The budget export is a single headerless sheet. Line items sit between a
//! row holding the `RUBRO` marker and the next row holding `TOTAL`; the
//! description and total amount live at fixed template columns.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::cells::{cell_text, clean_amount, is_storable};
use crate::error::{ImportError, Result};
use crate::workbook::Sheet;

pub const BUDGET_START_MARKER: &str = "RUBRO";
pub const BUDGET_END_MARKER: &str = "TOTAL";

/// Column holding the rubro description.
pub const BUDGET_DESCRIPTION_COLUMN: usize = 2;
/// Column holding the rubro total value.
pub const BUDGET_AMOUNT_COLUMN: usize = 42;

/// A budget line item ready to become a rubro.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLine {
    pub description: String,
    pub amount: Decimal,
    /// 0-based sheet row, kept for logs.
    pub row: usize,
}

fn row_has_marker(sheet: &Sheet, row: usize, marker: &str) -> bool {
    sheet
        .row(row)
        .iter()
        .any(|cell| cell_text(cell).as_deref() == Some(marker))
}

/// Locate the `RUBRO` row and the first `TOTAL` row below it.
fn find_budget_region(sheet: &Sheet) -> Result<(usize, usize)> {
    let rubro_row = (0..sheet.height())
        .find(|&r| row_has_marker(sheet, r, BUDGET_START_MARKER))
        .ok_or_else(|| {
            ImportError::invalid_format(format!(
                "budget sheet '{}' has no '{}' header",
                sheet.name(),
                BUDGET_START_MARKER
            ))
        })?;

    let total_row = (rubro_row + 1..sheet.height())
        .find(|&r| row_has_marker(sheet, r, BUDGET_END_MARKER))
        .ok_or_else(|| {
            ImportError::invalid_format(format!(
                "budget sheet '{}' has no '{}' row after the '{}' header",
                sheet.name(),
                BUDGET_END_MARKER,
                BUDGET_START_MARKER
            ))
        })?;

    Ok((rubro_row, total_row))
}

/// Parse the budget sheet into line items.
/// This function is DETERMINISTIC: same sheet = same output.
pub fn parse_budget_sheet(sheet: &Sheet) -> Result<Vec<BudgetLine>> {
    let (rubro_row, total_row) = find_budget_region(sheet)?;
    tracing::debug!(rubro_row, total_row, "budget region located");

    let mut lines = Vec::new();
    let mut skipped = 0;

    for row in rubro_row + 1..total_row {
        let description = match cell_text(sheet.cell(row, BUDGET_DESCRIPTION_COLUMN)) {
            Some(d) => d,
            None => {
                skipped += 1;
                continue;
            }
        };

        // Missing, negative or oversized totals are recorded as zero.
        let amount = match clean_amount(sheet.cell(row, BUDGET_AMOUNT_COLUMN)) {
            Some(a) if a.is_sign_negative() => {
                tracing::warn!(row, %a, "negative rubro value recorded as zero");
                Decimal::ZERO
            }
            Some(a) if !is_storable(&a) => {
                tracing::warn!(row, %a, "oversized rubro value recorded as zero");
                Decimal::ZERO
            }
            Some(a) => a,
            None => Decimal::ZERO,
        };

        lines.push(BudgetLine {
            description,
            amount,
            row,
        });
    }

    tracing::info!(
        sheet = sheet.name(),
        parsed = lines.len(),
        skipped,
        "budget sheet parsed"
    );
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::Data;
    use rust_decimal_macros::dec;

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    /// Row with a description at column 2 and an amount at column 42.
    fn line(description: Data, amount: Data) -> Vec<Data> {
        let mut row = vec![Data::Empty; BUDGET_AMOUNT_COLUMN + 1];
        row[BUDGET_DESCRIPTION_COLUMN] = description;
        row[BUDGET_AMOUNT_COLUMN] = amount;
        row
    }

    fn marker_row(col: usize, marker: &str) -> Vec<Data> {
        let mut row = vec![Data::Empty; col + 1];
        row[col] = text(marker);
        row
    }

    fn budget_sheet(body: Vec<Vec<Data>>) -> Sheet {
        let mut rows = vec![
            vec![text("FORMATO PRESUPUESTO")],
            vec![],
            marker_row(2, "RUBRO"),
        ];
        rows.extend(body);
        rows.push(marker_row(2, "TOTAL"));
        rows.push(line(text("Notas"), text("$999")));
        Sheet::new("Presupuesto", rows)
    }

    // -------------------------------------------------------------------------
    // REGION DETECTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_lines_between_markers() {
        let sheet = budget_sheet(vec![
            line(text("Personal"), text("$1,200,000.00")),
            line(text("Equipos"), Data::Float(350000.0)),
            line(text("Viajes"), Data::Int(80000)),
        ]);

        let lines = parse_budget_sheet(&sheet).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].description, "Personal");
        assert_eq!(lines[0].amount, dec!(1200000));
        assert_eq!(lines[1].amount, dec!(350000));
        assert_eq!(lines[2].amount, dec!(80000));
        assert_eq!(lines[0].row, 3);
    }

    #[test]
    fn test_line_count_excludes_blank_descriptions() {
        // RUBRO at r = 2, TOTAL at t = 8: t - r - 1 = 5 rows, 2 blank.
        let sheet = budget_sheet(vec![
            line(text("A"), text("1")),
            line(Data::Empty, text("2")),
            line(text("B"), text("3")),
            line(text("   "), text("4")),
            line(text("C"), text("5")),
        ]);

        let lines = parse_budget_sheet(&sheet).unwrap();
        let descriptions: Vec<_> = lines.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(descriptions, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_total_header_on_rubro_row_is_not_the_end() {
        let mut header = marker_row(2, "RUBRO");
        header.resize(BUDGET_AMOUNT_COLUMN + 1, Data::Empty);
        header[BUDGET_AMOUNT_COLUMN] = text("TOTAL");

        let sheet = Sheet::new(
            "Presupuesto",
            vec![
                header,
                line(text("Personal"), text("100")),
                marker_row(2, "TOTAL"),
            ],
        );

        let lines = parse_budget_sheet(&sheet).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_markers_match_trimmed_text() {
        let sheet = Sheet::new(
            "Presupuesto",
            vec![
                marker_row(0, " RUBRO "),
                line(text("Personal"), text("100")),
                marker_row(5, "TOTAL"),
            ],
        );
        assert_eq!(parse_budget_sheet(&sheet).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_total_is_format_error() {
        let sheet = Sheet::new(
            "Presupuesto",
            vec![marker_row(2, "RUBRO"), line(text("Personal"), text("100"))],
        );
        let err = parse_budget_sheet(&sheet).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFileFormat(_)));
        assert!(err.to_string().contains("TOTAL"));
    }

    #[test]
    fn test_missing_rubro_is_format_error() {
        let sheet = Sheet::new(
            "Presupuesto",
            vec![line(text("Personal"), text("100")), marker_row(2, "TOTAL")],
        );
        let err = parse_budget_sheet(&sheet).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFileFormat(_)));
        assert!(err.to_string().contains("RUBRO"));
    }

    #[test]
    fn test_marker_substring_does_not_count() {
        let sheet = Sheet::new(
            "Presupuesto",
            vec![
                marker_row(2, "RUBROS DEL PROYECTO"),
                line(text("Personal"), text("100")),
                marker_row(2, "TOTAL"),
            ],
        );
        assert!(parse_budget_sheet(&sheet).is_err());
    }

    // -------------------------------------------------------------------------
    // AMOUNT POLICY
    // -------------------------------------------------------------------------

    #[test]
    fn test_amounts_are_never_negative() {
        let sheet = budget_sheet(vec![
            line(text("Malformado"), text("N/A")),
            line(text("Vacio"), Data::Empty),
            line(text("Negativo"), text("-500")),
            line(text("Valido"), text("$ 2,500.75")),
        ]);

        let lines = parse_budget_sheet(&sheet).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| !l.amount.is_sign_negative()));
        assert_eq!(lines[0].amount, Decimal::ZERO);
        assert_eq!(lines[1].amount, Decimal::ZERO);
        assert_eq!(lines[2].amount, Decimal::ZERO);
        assert_eq!(lines[3].amount, dec!(2500.75));
    }

    #[test]
    fn test_oversized_amounts_are_zero() {
        let sheet = budget_sheet(vec![
            line(text("Enorme"), text("$1,000,000,000,000,000,000")),
            line(text("Flotante"), Data::Float(5e20)),
            line(text("Tope"), text("999999999999999999.99")),
        ]);

        let lines = parse_budget_sheet(&sheet).unwrap();
        assert_eq!(lines[0].amount, Decimal::ZERO);
        assert_eq!(lines[1].amount, Decimal::ZERO);
        assert_eq!(lines[2].amount, dec!(999999999999999999.99));
    }

    #[test]
    fn test_numeric_description_is_kept_as_text() {
        let sheet = budget_sheet(vec![line(Data::Float(2024.0), text("10"))]);
        let lines = parse_budget_sheet(&sheet).unwrap();
        assert_eq!(lines[0].description, "2024");
    }

    #[test]
    fn test_determinism() {
        let sheet = budget_sheet(vec![
            line(text("Personal"), text("$1,000")),
            line(text("Equipos"), text("$2,000")),
        ]);
        let baseline = parse_budget_sheet(&sheet).unwrap();
        for _ in 0..5 {
            assert_eq!(parse_budget_sheet(&sheet).unwrap(), baseline);
        }
    }
}
