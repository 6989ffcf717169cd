//! Importer CLI - creates a project from its budget and activity workbooks
//!
//! Usage:
//!   # Parse only, nothing is written:
//!   cargo run --bin importer -- --name "Proyecto" --value 1000000 \
//!     --start-date 2024-01-15 --end-date 2025-01-15 \
//!     --budget-file presupuesto.xlsx --activities-file matriz.xlsx --dry-run
//!
//!   # Import into the database configured by DB_URL:
//!   cargo run --bin importer -- ... --migrate

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use importer::import::{self, ImportSummary};
use importer::{
    Config, MemoryStore, NewProject, PgProjectStore, ProjectImport, UploadStore, UploadedFile,
};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports a project from budget and activity workbooks")]
struct Args {
    /// Project name (at most 100 characters)
    #[arg(long)]
    name: String,

    #[arg(long)]
    description: Option<String>,

    /// Total project value
    #[arg(long, default_value = "0")]
    value: Decimal,

    /// Project start date (YYYY-MM-DD)
    #[arg(long)]
    start_date: NaiveDate,

    /// Project end date (YYYY-MM-DD)
    #[arg(long)]
    end_date: NaiveDate,

    /// Owning entity id (UUID)
    #[arg(long)]
    entity_id: Option<Uuid>,

    /// Budget workbook (.xlsx)
    #[arg(long)]
    budget_file: Option<PathBuf>,

    /// Activities workbook (.xlsx)
    #[arg(long)]
    activities_file: Option<PathBuf>,

    /// Dry run - parse everything but don't save to database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Apply database migrations before importing
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Print the import summary as JSON instead of text
    #[arg(long, default_value = "false")]
    json: bool,
}

async fn load_upload(path: &Path) -> Result<UploadedFile> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(UploadedFile { file_name, bytes })
}

async fn load_optional(path: Option<&PathBuf>) -> Result<Option<UploadedFile>> {
    match path {
        Some(p) => Ok(Some(load_upload(p).await?)),
        None => Ok(None),
    }
}

fn print_summary(summary: &ImportSummary) {
    println!("\n=== Import Complete ===");
    println!("Project ID: {}", summary.project.id);
    println!("Name: {}", summary.project.name);
    println!(
        "Period: {} .. {}",
        summary.project.start_date, summary.project.end_date
    );
    println!("{:-<60}", "");
    println!("Rubros: {}", summary.rubros);
    println!("Activities: {}", summary.activities);
    println!("Tasks: {}", summary.tasks);
    println!("Counterparts: {}", summary.counterparts);
    if summary.undetermined_schedules > 0 {
        println!(
            "⚠ {} activit(ies) without a determined schedule",
            summary.undetermined_schedules
        );
    }
    if let Some(path) = &summary.project.file_budget_path {
        println!("Budget file: {}", path);
    }
    if let Some(path) = &summary.project.file_activities_path {
        println!("Activities file: {}", path);
    }
    println!("{:-<60}", "");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("importer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if !args.json {
        println!("=== Project Importer ===");
        println!("Project: {}", args.name);
        println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    }

    let request = ProjectImport {
        project: NewProject {
            name: args.name.clone(),
            description: args.description.clone(),
            value: args.value,
            start_date: args.start_date,
            end_date: args.end_date,
            entity_id: args.entity_id,
        },
        budget_file: load_optional(args.budget_file.as_ref()).await?,
        activities_file: load_optional(args.activities_file.as_ref()).await?,
    };

    let summary = if args.dry_run {
        let store = MemoryStore::new();
        let summary = import::run(&store, request).await?;
        tracing::info!("dry run - nothing saved to database");
        summary
    } else {
        let config = Config::from_env()?;
        let store = PgProjectStore::connect(&config.db_url, config.db_max_connections)
            .await
            .context("Failed to connect to database")?;
        if args.migrate {
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("migrations applied");
        }
        let uploads = UploadStore::new(&config.upload_dir);
        import::run_with_uploads(&store, &uploads, request).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}
