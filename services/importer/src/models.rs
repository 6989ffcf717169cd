use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project fields supplied by the caller of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub value: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub value: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub file_budget_path: Option<String>,
    pub file_activities_path: Option<String>,
    pub entity_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RubroRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    /// 1-based order in the budget sheet.
    pub position: i32,
    pub description: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    /// 1-based order in the activity matrix.
    pub position: i32,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration: Option<i32>,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub task_num: String,
    pub position: i32,
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CounterpartRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub value_species: Decimal,
    pub value_cash: Decimal,
}
