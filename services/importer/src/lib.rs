//! Project import library - turns budget and activity workbooks into
//! project records
//!
//! Responsibilities:
//! - Read `.xlsx` workbooks (calamine) into in-memory sheets
//! - Extract budget lines ("rubros") between the RUBRO and TOTAL markers
//! - Group the activity/task matrix and attach each activity's schedule
//! - Read counterpart funding from the RESUMEN summary sheet
//! - Persist a project and all of its children in one transaction
//!
//! The CLI (`src/main.rs`) and the HTTP service both drive `import::run`.

pub mod activities;
pub mod budget;
pub mod cells;
pub mod config;
pub mod counterparts;
pub mod error;
pub mod import;
pub mod models;
pub mod schedule;
pub mod store;
pub mod uploads;
pub mod workbook;

pub use config::Config;
pub use error::{ImportError, Result};
pub use import::{ImportPlan, ImportSummary, ProjectImport, UploadedFile};
pub use models::NewProject;
pub use store::{MemoryStore, PgProjectStore, ProjectStore};
pub use uploads::{UploadKind, UploadStore};
