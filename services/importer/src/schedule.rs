//! Activity schedule arithmetic.
//!
//! The `Cronograma` sheet encodes each activity as "starts in month N of the
//! project, lasts M months". Dates are anchored to the project start date.

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::cells::{cell_months, is_blank};
use crate::workbook::Sheet;

pub const SCHEDULE_SHEET: &str = "Cronograma";

/// First data row of the schedule sheet (rows 0-1 are headers).
pub const SCHEDULE_FIRST_ROW: usize = 2;
pub const SCHEDULE_NAME_COLUMN: usize = 0;
pub const SCHEDULE_START_COLUMN: usize = 1;
pub const SCHEDULE_DURATION_COLUMN: usize = 2;

/// One activity line of the schedule sheet, still raw.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleRow {
    /// 1-based month in which the activity starts.
    pub start_offset: Option<u32>,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Schedule {
    Determined {
        start_date: NaiveDate,
        end_date: NaiveDate,
        duration_months: u32,
    },
    Undetermined,
}

impl Schedule {
    pub fn start_date(&self) -> Option<NaiveDate> {
        match self {
            Schedule::Determined { start_date, .. } => Some(*start_date),
            Schedule::Undetermined => None,
        }
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        match self {
            Schedule::Determined { end_date, .. } => Some(*end_date),
            Schedule::Undetermined => None,
        }
    }

    pub fn duration_months(&self) -> Option<u32> {
        match self {
            Schedule::Determined {
                duration_months, ..
            } => Some(*duration_months),
            Schedule::Undetermined => None,
        }
    }
}

/// Convert (start offset, duration) into absolute dates.
///
/// Month arithmetic keeps the day of month and clamps it to the end of
/// shorter months (Jan 31 + 1 month = Feb 28/29).
pub fn compute(
    start_offset_months: Option<u32>,
    duration_months: Option<u32>,
    project_start: NaiveDate,
) -> Schedule {
    let (offset, duration) = match (start_offset_months, duration_months) {
        (Some(o), Some(d)) if o >= 1 => (o, d),
        _ => return Schedule::Undetermined,
    };

    let start_date = if offset == 1 {
        Some(project_start)
    } else {
        project_start.checked_add_months(Months::new(offset - 1))
    };
    let end_date = start_date.and_then(|s| s.checked_add_months(Months::new(duration)));

    match (start_date, end_date) {
        (Some(start_date), Some(end_date)) => Schedule::Determined {
            start_date,
            end_date,
            duration_months: duration,
        },
        _ => Schedule::Undetermined,
    }
}

/// Read schedule rows from the `Cronograma` sheet until the first fully
/// blank row.
pub fn read_schedule_rows(sheet: &Sheet) -> Vec<ScheduleRow> {
    let mut rows = Vec::new();

    for row in SCHEDULE_FIRST_ROW..sheet.height() {
        let name = sheet.cell(row, SCHEDULE_NAME_COLUMN);
        let start = sheet.cell(row, SCHEDULE_START_COLUMN);
        let duration = sheet.cell(row, SCHEDULE_DURATION_COLUMN);

        if is_blank(name) && is_blank(start) && is_blank(duration) {
            break;
        }

        rows.push(ScheduleRow {
            start_offset: cell_months(start),
            duration: cell_months(duration),
        });
    }

    tracing::debug!(sheet = sheet.name(), rows = rows.len(), "schedule rows read");
    rows
}
