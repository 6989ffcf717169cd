//! Activity/task matrix extraction.
//!
//! The `Matriz de Formulación` sheet lists tasks one per row. The activity
//! name only appears on the first row of each activity, so a new non-blank
//! activity name is the signal that a new group begins.

use calamine::Data;
use chrono::NaiveDate;
use serde::Serialize;

use crate::cells::cell_text;
use crate::error::{ImportError, Result};
use crate::schedule::{compute, Schedule, ScheduleRow};
use crate::workbook::Sheet;

pub const ACTIVITY_SHEET: &str = "Matriz de Formulación";

/// Row holding the column labels; data starts right below it.
pub const ACTIVITY_HEADER_ROW: usize = 1;

pub const ACTIVITY_NAME_HEADER: &str = "Actividades";
pub const TASK_NUMBER_HEADER: &str = "Num_tarea";
pub const TASK_NAME_HEADER: &str = "Tareas";

/// State given to every imported activity and task.
pub const PENDING_STATE: &str = "Pendiente";

/// One row of the matrix, reduced to the three columns the import uses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskRow {
    pub activity_name: Option<String>,
    pub task_number: Option<String>,
    pub task_name: Option<String>,
}

impl ActivityTaskRow {
    fn is_blank(&self) -> bool {
        self.activity_name.is_none() && self.task_number.is_none() && self.task_name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedTask {
    pub task_num: String,
    /// 1-based position inside the activity.
    pub position: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityGroup {
    pub name: String,
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedActivity {
    pub name: String,
    pub schedule: Schedule,
    pub tasks: Vec<PlannedTask>,
}

/// Find the column whose header matches a label exactly (after trimming).
fn find_column(headers: &[Data], label: &str) -> Option<usize> {
    headers
        .iter()
        .position(|cell| cell_text(cell).as_deref() == Some(label))
}

/// Read the raw activity/task rows below the header row.
pub fn read_activity_rows(sheet: &Sheet) -> Result<Vec<ActivityTaskRow>> {
    let headers = sheet.row(ACTIVITY_HEADER_ROW);

    let column = |label: &str| {
        find_column(headers, label).ok_or_else(|| {
            ImportError::invalid_format(format!(
                "sheet '{}' has no '{}' column in header row {}",
                sheet.name(),
                label,
                ACTIVITY_HEADER_ROW + 1
            ))
        })
    };

    let activity_col = column(ACTIVITY_NAME_HEADER)?;
    let number_col = column(TASK_NUMBER_HEADER)?;
    let task_col = column(TASK_NAME_HEADER)?;

    let rows = (ACTIVITY_HEADER_ROW + 1..sheet.height())
        .map(|row| ActivityTaskRow {
            activity_name: cell_text(sheet.cell(row, activity_col)),
            task_number: cell_text(sheet.cell(row, number_col)),
            task_name: cell_text(sheet.cell(row, task_col)),
        })
        .collect();

    Ok(rows)
}

/// Segment the flat row list into activity groups.
///
/// Walking stops at the first all-blank row. Groups without tasks are
/// dropped.
pub fn group_activities(rows: &[ActivityTaskRow]) -> Vec<ActivityGroup> {
    let mut groups = Vec::new();
    let mut current: Option<String> = None;
    let mut pending: Vec<PlannedTask> = Vec::new();

    let flush = |groups: &mut Vec<ActivityGroup>, name: Option<String>, tasks: Vec<PlannedTask>| {
        match name {
            Some(name) if !tasks.is_empty() => groups.push(ActivityGroup { name, tasks }),
            Some(name) => tracing::debug!(activity = %name, "activity without tasks dropped"),
            None if !tasks.is_empty() => {
                tracing::warn!(count = tasks.len(), "tasks before the first activity discarded")
            }
            None => {}
        }
    };

    for row in rows {
        if row.is_blank() {
            break;
        }

        if let Some(name) = &row.activity_name {
            let previous = current.replace(name.clone());
            flush(&mut groups, previous, std::mem::take(&mut pending));
        }

        if let (Some(number), Some(name)) = (&row.task_number, &row.task_name) {
            pending.push(PlannedTask {
                task_num: number.clone(),
                position: pending.len() as i32 + 1,
                name: name.clone(),
            });
        }
    }

    flush(&mut groups, current, pending);
    groups
}

/// Group the matrix rows into activities and attach each one's schedule.
///
/// Group `i` takes `schedule_rows[i]`; the two sheets are assumed to list
/// activities in the same order.
pub fn extract(
    rows: &[ActivityTaskRow],
    schedule_rows: &[ScheduleRow],
    project_start: NaiveDate,
) -> Vec<PlannedActivity> {
    let groups = group_activities(rows);

    if !schedule_rows.is_empty() && schedule_rows.len() != groups.len() {
        tracing::warn!(
            activities = groups.len(),
            schedule_rows = schedule_rows.len(),
            "activity and schedule sheets list a different number of activities"
        );
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, group)| {
            let schedule = match schedule_rows.get(i) {
                Some(row) => compute(row.start_offset, row.duration, project_start),
                None => Schedule::Undetermined,
            };
            if schedule == Schedule::Undetermined {
                tracing::warn!(activity = %group.name, index = i, "activity schedule undetermined");
            }

            PlannedActivity {
                name: group.name,
                schedule,
                tasks: group.tasks,
            }
        })
        .collect()
}
