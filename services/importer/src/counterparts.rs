//! Counterpart funding summary parser (`RESUMEN` sheet).
//!
//! Template shape:
//! - rows 0-6: title block, ignored
//! - rows 7-8: two header rows; a column label is both cells joined, minus
//!   the `Contrapartida` prefix
//! - columns 0-2 describe the row, the last column is a grand total; the
//!   columns in between come in (species, cash) pairs, one pair per entity
//! - the values are read from the `TOTAL` row

use rust_decimal::Decimal;
use serde::Serialize;

use crate::cells::{cell_text, clean_amount, is_storable};
use crate::error::{ImportError, Result};
use crate::workbook::Sheet;

pub const COUNTERPART_SHEET: &str = "RESUMEN";

pub const COUNTERPART_PREAMBLE_ROWS: usize = 7;
pub const COUNTERPART_HEADER_ROWS: usize = 2;
/// Columns before the entity pairs.
pub const COUNTERPART_LEADING_COLUMNS: usize = 3;
pub const COUNTERPART_LABEL_PREFIX: &str = "contrapartida";
pub const COUNTERPART_TOTAL_MARKER: &str = "TOTAL";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterpartLine {
    pub entity: String,
    pub value_species: Decimal,
    pub value_cash: Decimal,
}

/// Join the two header cells of a column and drop the template prefix.
fn column_label(sheet: &Sheet, col: usize) -> Option<String> {
    let parts: Vec<String> = (0..COUNTERPART_HEADER_ROWS)
        .filter_map(|offset| cell_text(sheet.cell(COUNTERPART_PREAMBLE_ROWS + offset, col)))
        .collect();
    let joined = parts.join(" ");

    let label = match joined.get(..COUNTERPART_LABEL_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(COUNTERPART_LABEL_PREFIX) => {
            &joined[COUNTERPART_LABEL_PREFIX.len()..]
        }
        _ => joined.as_str(),
    };

    let label = label.trim_start_matches(|c: char| c.is_whitespace() || c == ':').trim();
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

fn find_total_row(sheet: &Sheet) -> Option<usize> {
    let first_data_row = COUNTERPART_PREAMBLE_ROWS + COUNTERPART_HEADER_ROWS;
    (first_data_row..sheet.height()).find(|&row| {
        (0..COUNTERPART_LEADING_COLUMNS).any(|col| {
            cell_text(sheet.cell(row, col))
                .map(|t| t.eq_ignore_ascii_case(COUNTERPART_TOTAL_MARKER))
                .unwrap_or(false)
        })
    })
}

/// Parse the counterpart summary into one line per funding entity.
///
/// Pairs with a blank entity label or a missing value are skipped; a line is
/// never emitted with only one of its two values.
pub fn parse_counterpart_summary(sheet: &Sheet) -> Result<Vec<CounterpartLine>> {
    let total_row = find_total_row(sheet).ok_or_else(|| {
        ImportError::invalid_format(format!(
            "sheet '{}' has no '{}' row",
            sheet.name(),
            COUNTERPART_TOTAL_MARKER
        ))
    })?;

    // The last column is the grand total, not an entity.
    let data_end = sheet.width().saturating_sub(1);

    let mut lines = Vec::new();
    let mut skipped = 0;
    let mut col = COUNTERPART_LEADING_COLUMNS;

    while col < data_end {
        let species_col = col;
        let cash_col = col + 1;
        col += 2;

        let entity = match column_label(sheet, species_col) {
            Some(e) => e,
            None => {
                skipped += 1;
                continue;
            }
        };

        let species = clean_amount(sheet.cell(total_row, species_col))
            .map(|v| storable_or_zero(v, &entity));
        let cash = if cash_col < data_end {
            clean_amount(sheet.cell(total_row, cash_col)).map(|v| storable_or_zero(v, &entity))
        } else {
            None
        };

        match (species, cash) {
            (Some(value_species), Some(value_cash)) => lines.push(CounterpartLine {
                entity,
                value_species,
                value_cash,
            }),
            _ => {
                tracing::debug!(entity = %entity, "counterpart pair without both values skipped");
                skipped += 1;
            }
        }
    }

    tracing::info!(
        sheet = sheet.name(),
        parsed = lines.len(),
        skipped,
        "counterpart summary parsed"
    );
    Ok(lines)
}

fn storable_or_zero(value: Decimal, entity: &str) -> Decimal {
    if is_storable(&value) {
        value
    } else {
        tracing::warn!(entity, %value, "oversized counterpart value recorded as zero");
        Decimal::ZERO
    }
}
