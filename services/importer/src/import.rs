//! Project import orchestration.
//!
//! An import runs in two phases:
//! 1. plan: validate the request and parse every attached workbook into an
//!    in-memory `ImportPlan` (no I/O besides reading the given bytes)
//! 2. persist: hand the whole plan to a `ProjectStore`, which writes it in a
//!    single transaction
//!
//! A parse failure therefore never reaches storage, and a storage failure
//! rolls back everything written for the import.

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::activities::{self, PlannedActivity, ACTIVITY_SHEET, PENDING_STATE};
use crate::budget::{self, BudgetLine};
use crate::cells::{is_storable, STORED_AMOUNT_LIMIT};
use crate::counterparts::{self, CounterpartLine, COUNTERPART_SHEET};
use crate::error::{ImportError, Result};
use crate::models::{
    ActivityRecord, CounterpartRecord, NewProject, ProjectRecord, RubroRecord, TaskRecord,
};
use crate::schedule::{self, SCHEDULE_SHEET};
use crate::store::ProjectStore;
use crate::uploads::{UploadKind, UploadStore};
use crate::workbook::{ensure_xlsx, Workbook};

pub const PROJECT_NAME_MAX_LEN: usize = 100;

/// A workbook received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Everything needed to create one project.
#[derive(Debug, Clone)]
pub struct ProjectImport {
    pub project: NewProject,
    pub budget_file: Option<UploadedFile>,
    pub activities_file: Option<UploadedFile>,
}

/// An activity row together with its task rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityWithTasks {
    pub activity: ActivityRecord,
    pub tasks: Vec<TaskRecord>,
}

/// Fully parsed rows for one project, all keyed to `project.id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportPlan {
    pub project: ProjectRecord,
    pub rubros: Vec<RubroRecord>,
    pub activities: Vec<ActivityWithTasks>,
    pub counterparts: Vec<CounterpartRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub project: ProjectRecord,
    pub rubros: usize,
    pub activities: usize,
    pub tasks: usize,
    pub counterparts: usize,
    pub undetermined_schedules: usize,
}

impl ImportPlan {
    pub fn task_count(&self) -> usize {
        self.activities.iter().map(|a| a.tasks.len()).sum()
    }

    pub fn summary(&self, project: ProjectRecord) -> ImportSummary {
        ImportSummary {
            project,
            rubros: self.rubros.len(),
            activities: self.activities.len(),
            tasks: self.task_count(),
            counterparts: self.counterparts.len(),
            undetermined_schedules: self
                .activities
                .iter()
                .filter(|a| a.activity.start_date.is_none())
                .count(),
        }
    }
}

fn validate_project(project: &NewProject) -> Result<()> {
    let name = project.name.trim();
    if name.is_empty() {
        return Err(ImportError::InvalidRequest("project name is required".into()));
    }
    if name.chars().count() > PROJECT_NAME_MAX_LEN {
        return Err(ImportError::InvalidRequest(format!(
            "project name must be at most {} characters",
            PROJECT_NAME_MAX_LEN
        )));
    }
    if project.value.is_sign_negative() {
        return Err(ImportError::InvalidRequest(
            "project value must not be negative".into(),
        ));
    }
    if !is_storable(&project.value) {
        return Err(ImportError::InvalidRequest(format!(
            "project value must be below {}",
            STORED_AMOUNT_LIMIT
        )));
    }
    if project.end_date < project.start_date {
        return Err(ImportError::InvalidRequest(format!(
            "end_date {} is before start_date {}",
            project.end_date, project.start_date
        )));
    }
    Ok(())
}

fn parse_budget_file(file: &UploadedFile) -> Result<Vec<BudgetLine>> {
    tracing::info!(file = %file.file_name, "processing budget workbook");
    let mut workbook = Workbook::from_bytes(file.bytes.clone())?;
    let sheet = workbook.first_sheet()?;
    budget::parse_budget_sheet(&sheet)
}

fn parse_activities_file(
    file: &UploadedFile,
    project: &NewProject,
) -> Result<(Vec<PlannedActivity>, Vec<CounterpartLine>)> {
    tracing::info!(file = %file.file_name, "processing activities workbook");
    let mut workbook = Workbook::from_bytes(file.bytes.clone())?;

    let matrix = workbook.required_sheet(ACTIVITY_SHEET)?;
    let rows = activities::read_activity_rows(&matrix)?;

    let schedule_rows = match workbook.sheet(SCHEDULE_SHEET)? {
        Some(sheet) => schedule::read_schedule_rows(&sheet),
        None => {
            tracing::warn!("workbook has no '{}' sheet; schedules left undetermined", SCHEDULE_SHEET);
            Vec::new()
        }
    };

    let planned = activities::extract(&rows, &schedule_rows, project.start_date);

    let counterparts = match workbook.sheet(COUNTERPART_SHEET)? {
        Some(sheet) => counterparts::parse_counterpart_summary(&sheet)?,
        None => Vec::new(),
    };

    Ok((planned, counterparts))
}

fn activity_rows(
    project_id: Uuid,
    position: i32,
    planned: PlannedActivity,
) -> ActivityWithTasks {
    let activity_id = Uuid::new_v4();
    let activity = ActivityRecord {
        id: activity_id,
        project_id,
        position,
        name: planned.name,
        start_date: planned.schedule.start_date(),
        end_date: planned.schedule.end_date(),
        duration: planned
            .schedule
            .duration_months()
            .and_then(|d| i32::try_from(d).ok()),
        state: PENDING_STATE.to_string(),
    };

    let tasks = planned
        .tasks
        .into_iter()
        .map(|task| TaskRecord {
            id: Uuid::new_v4(),
            activity_id,
            task_num: task.task_num,
            position: task.position,
            name: task.name,
            state: PENDING_STATE.to_string(),
        })
        .collect();

    ActivityWithTasks { activity, tasks }
}

/// Validate the request and parse every attached workbook.
/// Parsing is DETERMINISTIC; only the generated ids differ between runs.
pub fn plan_import(import: &ProjectImport) -> Result<ImportPlan> {
    validate_project(&import.project)?;
    for file in [&import.budget_file, &import.activities_file].into_iter().flatten() {
        ensure_xlsx(&file.file_name)?;
    }

    let project_id = Uuid::new_v4();
    let new_project = &import.project;
    let project = ProjectRecord {
        id: project_id,
        name: new_project.name.trim().to_string(),
        description: new_project.description.clone(),
        value: new_project.value,
        start_date: new_project.start_date,
        end_date: new_project.end_date,
        file_budget_path: None,
        file_activities_path: None,
        entity_id: new_project.entity_id,
        // TIMESTAMPTZ keeps microseconds.
        created_at: Utc::now().trunc_subsecs(6),
    };

    let rubros = match &import.budget_file {
        Some(file) => parse_budget_file(file)?
            .into_iter()
            .zip(1..)
            .map(|(line, position)| RubroRecord {
                id: Uuid::new_v4(),
                project_id,
                position,
                description: line.description,
                value: line.amount,
            })
            .collect(),
        None => Vec::new(),
    };

    let (planned, counterpart_lines) = match &import.activities_file {
        Some(file) => parse_activities_file(file, new_project)?,
        None => (Vec::new(), Vec::new()),
    };

    let activities = planned
        .into_iter()
        .zip(1..)
        .map(|(p, position)| activity_rows(project_id, position, p))
        .collect();

    let counterparts = counterpart_lines
        .into_iter()
        .map(|line| CounterpartRecord {
            id: Uuid::new_v4(),
            project_id,
            name: line.entity,
            value_species: line.value_species,
            value_cash: line.value_cash,
        })
        .collect();

    Ok(ImportPlan {
        project,
        rubros,
        activities,
        counterparts,
    })
}

/// Run `plan_import` on the blocking pool and hand the request back with
/// its plan. A panic while parsing surfaces as `ImportError::Unexpected`.
async fn plan_in_background(import: ProjectImport) -> Result<(ProjectImport, ImportPlan)> {
    let (import, plan) = tokio::task::spawn_blocking(move || {
        let plan = plan_import(&import);
        (import, plan)
    })
    .await
    .map_err(|e| ImportError::Unexpected(format!("import worker failed: {}", e)))?;
    Ok((import, plan?))
}

pub async fn prepare(import: ProjectImport) -> Result<ImportPlan> {
    plan_in_background(import).await.map(|(_, plan)| plan)
}

/// Import a project: parse everything, then persist it atomically.
pub async fn run<S>(store: &S, import: ProjectImport) -> Result<ImportSummary>
where
    S: ProjectStore + ?Sized,
{
    let plan = prepare(import).await?;
    commit(store, &plan).await
}

/// Like `run`, but also keeps the source workbooks in `uploads` and records
/// their paths on the project. Stored files are removed again when the
/// import fails.
pub async fn run_with_uploads<S>(
    store: &S,
    uploads: &UploadStore,
    import: ProjectImport,
) -> Result<ImportSummary>
where
    S: ProjectStore + ?Sized,
{
    let (import, mut plan) = plan_in_background(import).await?;

    let mut saved = Vec::new();
    let outcome = match attach_uploads(uploads, &import, &mut plan, &mut saved).await {
        Ok(()) => commit(store, &plan).await,
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        uploads.discard(&saved).await;
    }
    outcome
}

async fn attach_uploads(
    uploads: &UploadStore,
    import: &ProjectImport,
    plan: &mut ImportPlan,
    saved: &mut Vec<String>,
) -> Result<()> {
    let project_id = plan.project.id;

    if let Some(file) = &import.budget_file {
        let path = uploads.save(project_id, UploadKind::Budget, &file.bytes).await?;
        saved.push(path.clone());
        plan.project.file_budget_path = Some(path);
    }
    if let Some(file) = &import.activities_file {
        let path = uploads
            .save(project_id, UploadKind::Activities, &file.bytes)
            .await?;
        saved.push(path.clone());
        plan.project.file_activities_path = Some(path);
    }
    Ok(())
}

/// Persist an already prepared plan.
pub async fn commit<S>(store: &S, plan: &ImportPlan) -> Result<ImportSummary>
where
    S: ProjectStore + ?Sized,
{
    let project = store.persist(plan).await?;
    let summary = plan.summary(project);

    tracing::info!(
        project_id = %summary.project.id,
        rubros = summary.rubros,
        activities = summary.activities,
        tasks = summary.tasks,
        counterparts = summary.counterparts,
        undetermined_schedules = summary.undetermined_schedules,
        "project imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn new_project() -> NewProject {
        NewProject {
            name: "Fortalecimiento agrícola".into(),
            description: Some("Proyecto piloto".into()),
            value: dec!(150000000),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            entity_id: None,
        }
    }

    fn import_with(project: NewProject) -> ProjectImport {
        ProjectImport {
            project,
            budget_file: None,
            activities_file: None,
        }
    }

    #[test]
    fn test_plan_without_files_has_only_project() {
        let plan = plan_import(&import_with(new_project())).unwrap();
        assert_eq!(plan.project.name, "Fortalecimiento agrícola");
        assert!(plan.rubros.is_empty());
        assert!(plan.activities.is_empty());
        assert!(plan.counterparts.is_empty());
    }

    #[test]
    fn test_validation_rejects_blank_name() {
        let mut project = new_project();
        project.name = "   ".into();
        let err = plan_import(&import_with(project)).unwrap_err();
        assert!(matches!(err, ImportError::InvalidRequest(_)));
    }

    #[test]
    fn test_validation_rejects_long_name() {
        let mut project = new_project();
        project.name = "x".repeat(PROJECT_NAME_MAX_LEN + 1);
        assert!(plan_import(&import_with(project)).is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_dates() {
        let mut project = new_project();
        project.end_date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let err = plan_import(&import_with(project)).unwrap_err();
        assert!(err.to_string().contains("before start_date"));
    }

    #[test]
    fn test_validation_rejects_negative_value() {
        let mut project = new_project();
        project.value = dec!(-1);
        assert!(plan_import(&import_with(project)).is_err());
    }

    #[test]
    fn test_validation_rejects_oversized_value() {
        let mut project = new_project();
        project.value = dec!(1000000000000000000);
        let err = plan_import(&import_with(project)).unwrap_err();
        assert!(matches!(err, ImportError::InvalidRequest(_)));
        assert!(err.to_string().contains("must be below"));

        let mut project = new_project();
        project.value = dec!(999999999999999999.99);
        assert!(plan_import(&import_with(project)).is_ok());
    }

    #[test]
    fn test_created_at_has_microsecond_precision() {
        let plan = plan_import(&import_with(new_project())).unwrap();
        assert_eq!(plan.project.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_non_xlsx_upload_is_rejected_before_parsing() {
        let mut import = import_with(new_project());
        import.budget_file = Some(UploadedFile {
            file_name: "presupuesto.csv".into(),
            bytes: b"RUBRO,TOTAL".to_vec(),
        });
        let err = plan_import(&import).unwrap_err();
        assert!(matches!(err, ImportError::InvalidFileFormat(_)));
    }

    #[test]
    fn test_activity_rows_share_ids() {
        let planned = PlannedActivity {
            name: "A".into(),
            schedule: Schedule::Undetermined,
            tasks: vec![activities::PlannedTask {
                task_num: "1".into(),
                position: 1,
                name: "a1".into(),
            }],
        };
        let project_id = Uuid::new_v4();
        let rows = activity_rows(project_id, 1, planned);

        assert_eq!(rows.activity.project_id, project_id);
        assert_eq!(rows.activity.position, 1);
        assert_eq!(rows.activity.state, PENDING_STATE);
        assert_eq!(rows.activity.start_date, None);
        assert_eq!(rows.activity.duration, None);
        assert_eq!(rows.tasks[0].activity_id, rows.activity.id);
        assert_eq!(rows.tasks[0].state, PENDING_STATE);
    }
}
