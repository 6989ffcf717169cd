//! API Service - HTTP front end for project imports
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /projects - List projects, newest first
//! - POST /projects - Create a project from a multipart form and its workbooks
//! - GET /projects/:id - Get one project
//! - GET /projects/:id/rubros - Budget lines of a project
//! - GET /projects/:id/activities - Activities with their tasks
//! - GET /projects/:id/counterparts - Counterpart funding of a project

mod error;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use importer::import;
use importer::models::{ActivityRecord, CounterpartRecord, ProjectRecord, RubroRecord, TaskRecord};
use importer::{Config, NewProject, PgProjectStore, ProjectImport, ProjectStore, UploadStore, UploadedFile};

use crate::error::{ApiError, Result};

/// Largest accepted request body (two workbooks plus form fields).
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// ============================================================================
// State
// ============================================================================

struct AppState {
    pool: PgPool,
    store: Arc<dyn ProjectStore>,
    uploads: UploadStore,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ActivityResponse {
    #[serde(flatten)]
    activity: ActivityRecord,
    tasks: Vec<TaskRecord>,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct ProjectsQuery {
    limit: Option<i64>,
}

// ============================================================================
// Multipart form
// ============================================================================

fn required<'a>(fields: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest(format!("missing field '{}'", key)))
}

fn parse_field<T: FromStr>(fields: &HashMap<String, String>, key: &str) -> Result<T> {
    required(fields, key)?
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("field '{}' is not valid", key)))
}

fn optional_field<T: FromStr>(fields: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match fields.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(_) => parse_field(fields, key).map(Some),
    }
}

/// Read the project form. Text fields are collected by name; the two file
/// fields become uploads when a non-empty file was sent.
async fn read_import_form(mut multipart: Multipart) -> Result<ProjectImport> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut budget_file = None;
    let mut activities_file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file_budget" | "file_activities" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                if bytes.is_empty() {
                    continue;
                }
                let upload = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
                if name == "file_budget" {
                    budget_file = upload;
                } else {
                    activities_file = upload;
                }
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                fields.insert(name, text);
            }
        }
    }

    let description = fields
        .get("description")
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let project = NewProject {
        name: required(&fields, "name")?.to_string(),
        description,
        value: optional_field::<Decimal>(&fields, "value")?.unwrap_or(Decimal::ZERO),
        start_date: parse_field::<NaiveDate>(&fields, "start_date")?,
        end_date: parse_field::<NaiveDate>(&fields, "end_date")?,
        entity_id: optional_field::<Uuid>(&fields, "entity_id")?,
    };

    Ok(ProjectImport {
        project,
        budget_file,
        activities_file,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_project_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    let request = read_import_form(multipart).await?;
    tracing::info!(name = %request.project.name, "project import requested");

    let summary = import::run_with_uploads(state.store.as_ref(), &state.uploads, request).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_projects_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProjectsQuery>,
) -> Result<Json<Vec<ProjectRecord>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let projects: Vec<ProjectRecord> = sqlx::query_as(
        r#"
        SELECT id, name, description, value, start_date, end_date,
               file_budget_path, file_activities_path, entity_id, created_at
        FROM projects
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(projects))
}

async fn fetch_project(pool: &PgPool, id: Uuid) -> Result<ProjectRecord> {
    let project: Option<ProjectRecord> = sqlx::query_as(
        r#"
        SELECT id, name, description, value, start_date, end_date,
               file_budget_path, file_activities_path, entity_id, created_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    project.ok_or(ApiError::ProjectNotFound(id))
}

async fn get_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectRecord>> {
    Ok(Json(fetch_project(&state.pool, id).await?))
}

async fn rubros_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RubroRecord>>> {
    fetch_project(&state.pool, id).await?;

    let rubros: Vec<RubroRecord> = sqlx::query_as(
        r#"
        SELECT id, project_id, position, description, value
        FROM rubros
        WHERE project_id = $1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rubros))
}

async fn activities_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ActivityResponse>>> {
    fetch_project(&state.pool, id).await?;

    let activities: Vec<ActivityRecord> = sqlx::query_as(
        r#"
        SELECT id, project_id, position, name, start_date, end_date, duration, state
        FROM activities
        WHERE project_id = $1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let activity_ids: Vec<Uuid> = activities.iter().map(|a| a.id).collect();
    let tasks: Vec<TaskRecord> = sqlx::query_as(
        r#"
        SELECT id, activity_id, task_num, position, name, state
        FROM tasks
        WHERE activity_id = ANY($1)
        ORDER BY activity_id, position
        "#,
    )
    .bind(&activity_ids)
    .fetch_all(&state.pool)
    .await?;

    let mut by_activity: HashMap<Uuid, Vec<TaskRecord>> = HashMap::new();
    for task in tasks {
        by_activity.entry(task.activity_id).or_default().push(task);
    }

    let response = activities
        .into_iter()
        .map(|activity| ActivityResponse {
            tasks: by_activity.remove(&activity.id).unwrap_or_default(),
            activity,
        })
        .collect();

    Ok(Json(response))
}

async fn counterparts_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CounterpartRecord>>> {
    fetch_project(&state.pool, id).await?;

    let counterparts: Vec<CounterpartRecord> = sqlx::query_as(
        r#"
        SELECT id, project_id, name, value_species, value_cash
        FROM counterparts
        WHERE project_id = $1
        ORDER BY name
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(counterparts))
}

// ============================================================================
// Router
// ============================================================================

fn app(state: Arc<AppState>) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/projects",
            get(list_projects_handler).post(create_project_handler),
        )
        .route("/projects/:id", get(get_project_handler))
        .route("/projects/:id/rubros", get(rubros_handler))
        .route("/projects/:id/activities", get(activities_handler))
        .route("/projects/:id/counterparts", get(counterparts_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("importer=info,api=info,tower_http=info")
        }))
        .init();

    let config = Config::from_env()?;

    println!("=== Project Import API ===");
    println!("Connecting to database...");

    let store = PgProjectStore::connect(&config.db_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    println!("Database connected");
    println!("Uploads stored in {}", config.upload_dir.display());

    let state = Arc::new(AppState {
        pool: store.pool().clone(),
        store: Arc::new(store),
        uploads: UploadStore::new(&config.upload_dir),
    });

    let app = app(state);

    println!("API listening on http://{}", config.api_bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  GET  /projects?limit=");
    println!("  POST /projects (multipart: name, description, value, start_date, end_date, entity_id, file_budget, file_activities)");
    println!("  GET  /projects/:id");
    println!("  GET  /projects/:id/rubros");
    println!("  GET  /projects/:id/activities");
    println!("  GET  /projects/:id/counterparts");

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
