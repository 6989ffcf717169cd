//! Persistence of import plans.
//!
//! `ProjectStore::persist` is all-or-nothing: either the project and every
//! child row are stored, or none are.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::import::ImportPlan;
use crate::models::{ActivityRecord, CounterpartRecord, ProjectRecord, RubroRecord, TaskRecord};

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Write the whole plan atomically and return the stored project.
    async fn persist(&self, plan: &ImportPlan) -> Result<ProjectRecord>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Clone)]
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(|e| ImportError::persistence("connecting to database", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ImportError::persistence("running migrations", e.into()))
    }
}

fn unknown_entity(id: Uuid) -> ImportError {
    ImportError::InvalidRequest(format!("unknown entity {}", id))
}

async fn ensure_entity_exists(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM entities WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| ImportError::persistence("checking entity", e))?;

    row.map(|_| ()).ok_or_else(|| unknown_entity(id))
}

async fn insert_project(tx: &mut Transaction<'_, Postgres>, project: &ProjectRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO projects
        (id, name, description, value, start_date, end_date,
         file_budget_path, file_activities_path, entity_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(project.id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.value)
    .bind(project.start_date)
    .bind(project.end_date)
    .bind(&project.file_budget_path)
    .bind(&project.file_activities_path)
    .bind(project.entity_id)
    .bind(project.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| ImportError::persistence("inserting project", e))?;
    Ok(())
}

async fn insert_rubro(tx: &mut Transaction<'_, Postgres>, rubro: &RubroRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rubros (id, project_id, position, description, value)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(rubro.id)
    .bind(rubro.project_id)
    .bind(rubro.position)
    .bind(&rubro.description)
    .bind(rubro.value)
    .execute(&mut **tx)
    .await
    .map_err(|e| ImportError::persistence("inserting rubro", e))?;
    Ok(())
}

async fn insert_activity(
    tx: &mut Transaction<'_, Postgres>,
    activity: &ActivityRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activities
        (id, project_id, position, name, start_date, end_date, duration, state)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(activity.id)
    .bind(activity.project_id)
    .bind(activity.position)
    .bind(&activity.name)
    .bind(activity.start_date)
    .bind(activity.end_date)
    .bind(activity.duration)
    .bind(&activity.state)
    .execute(&mut **tx)
    .await
    .map_err(|e| ImportError::persistence("inserting activity", e))?;
    Ok(())
}

async fn insert_task(tx: &mut Transaction<'_, Postgres>, task: &TaskRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tasks (id, activity_id, task_num, position, name, state)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(task.id)
    .bind(task.activity_id)
    .bind(&task.task_num)
    .bind(task.position)
    .bind(&task.name)
    .bind(&task.state)
    .execute(&mut **tx)
    .await
    .map_err(|e| ImportError::persistence("inserting task", e))?;
    Ok(())
}

async fn insert_counterpart(
    tx: &mut Transaction<'_, Postgres>,
    counterpart: &CounterpartRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO counterparts (id, project_id, name, value_species, value_cash)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(counterpart.id)
    .bind(counterpart.project_id)
    .bind(&counterpart.name)
    .bind(counterpart.value_species)
    .bind(counterpart.value_cash)
    .execute(&mut **tx)
    .await
    .map_err(|e| ImportError::persistence("inserting counterpart", e))?;
    Ok(())
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn persist(&self, plan: &ImportPlan) -> Result<ProjectRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ImportError::persistence("starting transaction", e))?;

        // Dropping `tx` on any early return rolls the import back.
        if let Some(entity_id) = plan.project.entity_id {
            ensure_entity_exists(&mut tx, entity_id).await?;
        }
        insert_project(&mut tx, &plan.project).await?;

        for rubro in &plan.rubros {
            insert_rubro(&mut tx, rubro).await?;
        }

        for entry in &plan.activities {
            insert_activity(&mut tx, &entry.activity).await?;
            for task in &entry.tasks {
                insert_task(&mut tx, task).await?;
            }
        }

        for counterpart in &plan.counterparts {
            insert_counterpart(&mut tx, counterpart).await?;
        }

        tx.commit()
            .await
            .map_err(|e| ImportError::persistence("committing import", e))?;

        Ok(plan.project.clone())
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    pub projects: Vec<ProjectRecord>,
    pub rubros: Vec<RubroRecord>,
    pub activities: Vec<ActivityRecord>,
    pub tasks: Vec<TaskRecord>,
    pub counterparts: Vec<CounterpartRecord>,
}

/// Store that keeps everything in process memory. Used for dry runs and
/// tests.
///
/// A plan is written into a staged copy of the state, which replaces the
/// live state only once every row is in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Row inserts allowed per plan before a write fails.
    fail_after: Option<usize>,
    /// Entities that exist; `None` accepts any entity reference.
    known_entities: Option<Vec<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails, leaving it empty.
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// A store that accepts `inserts` rows of a plan and fails on the next.
    pub fn failing_after(inserts: usize) -> Self {
        Self {
            fail_after: Some(inserts),
            ..Self::default()
        }
    }

    /// A store that only accepts projects referencing one of `entities`.
    pub fn with_entities(entities: Vec<Uuid>) -> Self {
        Self {
            known_entities: Some(entities),
            ..Self::default()
        }
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    fn check_entity(&self, entity_id: Option<Uuid>) -> Result<()> {
        match (entity_id, &self.known_entities) {
            (Some(id), Some(known)) if !known.contains(&id) => Err(unknown_entity(id)),
            _ => Ok(()),
        }
    }
}

/// Counts row inserts and fails once the budget is spent.
struct InsertBudget {
    remaining: Option<usize>,
}

impl InsertBudget {
    fn take(&mut self, context: &str) -> Result<()> {
        match self.remaining.as_mut() {
            Some(0) => Err(ImportError::persistence(
                context,
                sqlx::Error::Protocol("memory store rejects writes".into()),
            )),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn persist(&self, plan: &ImportPlan) -> Result<ProjectRecord> {
        let mut state = self.state.lock().await;
        self.check_entity(plan.project.entity_id)?;

        let mut staged = state.clone();
        let mut budget = InsertBudget {
            remaining: self.fail_after,
        };

        budget.take("inserting project")?;
        staged.projects.push(plan.project.clone());

        for rubro in &plan.rubros {
            budget.take("inserting rubro")?;
            staged.rubros.push(rubro.clone());
        }

        for entry in &plan.activities {
            budget.take("inserting activity")?;
            staged.activities.push(entry.activity.clone());
            for task in &entry.tasks {
                budget.take("inserting task")?;
                staged.tasks.push(task.clone());
            }
        }

        for counterpart in &plan.counterparts {
            budget.take("inserting counterpart")?;
            staged.counterparts.push(counterpart.clone());
        }

        *state = staged;
        Ok(plan.project.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{plan_import, ActivityWithTasks, ProjectImport};
    use crate::models::NewProject;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn plan_for(name: &str, entity_id: Option<Uuid>) -> ImportPlan {
        plan_import(&ProjectImport {
            project: NewProject {
                name: name.into(),
                description: None,
                value: dec!(1000),
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
                entity_id,
            },
            budget_file: None,
            activities_file: None,
        })
        .unwrap()
    }

    fn plan(name: &str) -> ImportPlan {
        plan_for(name, None)
    }

    /// A plan with two rubros, one activity with two tasks and a counterpart.
    fn plan_with_children(name: &str) -> ImportPlan {
        let mut plan = plan(name);
        let project_id = plan.project.id;
        let activity_id = Uuid::new_v4();

        plan.rubros = (1..=2)
            .map(|position| RubroRecord {
                id: Uuid::new_v4(),
                project_id,
                position,
                description: format!("Rubro {}", position),
                value: dec!(10),
            })
            .collect();
        plan.activities = vec![ActivityWithTasks {
            activity: ActivityRecord {
                id: activity_id,
                project_id,
                position: 1,
                name: "Diagnóstico".into(),
                start_date: None,
                end_date: None,
                duration: None,
                state: "Pendiente".into(),
            },
            tasks: (1..=2)
                .map(|position| TaskRecord {
                    id: Uuid::new_v4(),
                    activity_id,
                    task_num: position.to_string(),
                    position,
                    name: format!("Tarea {}", position),
                    state: "Pendiente".into(),
                })
                .collect(),
        }];
        plan.counterparts = vec![CounterpartRecord {
            id: Uuid::new_v4(),
            project_id,
            name: "Alcaldía".into(),
            value_species: dec!(1),
            value_cash: dec!(2),
        }];
        plan
    }

    #[tokio::test]
    async fn test_memory_store_keeps_projects_apart() {
        let store = MemoryStore::new();
        let first = store.persist(&plan("Uno")).await.unwrap();
        let second = store.persist(&plan("Dos")).await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.projects.len(), 2);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_failing_store_writes_nothing() {
        let store = MemoryStore::failing();
        let err = store.persist(&plan("Uno")).await.unwrap_err();

        assert!(matches!(err, ImportError::Persistence { .. }));
        assert!(store.snapshot().await.projects.is_empty());
    }

    #[tokio::test]
    async fn test_failure_midway_rolls_back_the_whole_plan() {
        // Project, first rubro and second rubro go in; the activity fails.
        let store = MemoryStore::failing_after(3);
        let kept = store.persist(&plan("Sin hijos")).await.unwrap();

        let err = store
            .persist(&plan_with_children("Con hijos"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Persistence { .. }));
        assert!(err.to_string().contains("inserting activity"));

        let state = store.snapshot().await;
        assert_eq!(state.projects.len(), 1);
        assert_eq!(state.projects[0].id, kept.id);
        assert!(state.rubros.is_empty());
        assert!(state.activities.is_empty());
        assert!(state.tasks.is_empty());
        assert!(state.counterparts.is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_last_row_rolls_back() {
        // 1 project + 2 rubros + 1 activity + 2 tasks, then the counterpart fails.
        let store = MemoryStore::failing_after(6);
        let err = store
            .persist(&plan_with_children("Casi"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("inserting counterpart"));
        let state = store.snapshot().await;
        assert!(state.projects.is_empty());
        assert!(state.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entity_is_rejected_as_bad_request() {
        let known = Uuid::new_v4();
        let store = MemoryStore::with_entities(vec![known]);

        let stranger = Uuid::new_v4();
        let err = store
            .persist(&plan_for("Ajeno", Some(stranger)))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidRequest(_)));
        assert!(err.is_client_error());
        assert!(err.to_string().contains(&stranger.to_string()));
        assert!(store.snapshot().await.projects.is_empty());

        let stored = store.persist(&plan_for("Propio", Some(known))).await.unwrap();
        assert_eq!(stored.entity_id, Some(known));
    }
}
