//! Storage of the uploaded source workbooks.
//!
//! Files land under `<root>/projects/<kind>/<project_id>_<kind>.xlsx`; the
//! project keeps the path relative to `<root>`.

use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::Result;
use crate::workbook::XLSX_EXTENSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Budget,
    Activities,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Budget => "file_budget",
            UploadKind::Activities => "file_activities",
        }
    }
}

/// Relative storage path for a project's upload.
pub fn relative_path(project_id: Uuid, kind: UploadKind) -> PathBuf {
    let kind = kind.as_str();
    Path::new("projects")
        .join(kind)
        .join(format!("{}_{}.{}", project_id, kind, XLSX_EXTENSION))
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the file and return its path relative to the store root.
    pub async fn save(&self, project_id: Uuid, kind: UploadKind, bytes: &[u8]) -> Result<String> {
        let relative = relative_path(project_id, kind);
        let path = self.root.join(&relative);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, bytes).await?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "upload stored");
        Ok(relative.to_string_lossy().to_string())
    }

    /// Remove previously saved files. Missing files are ignored.
    pub async fn discard(&self, relative_paths: &[String]) {
        for relative in relative_paths {
            let path = self.root.join(relative);
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "upload discarded"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to discard upload"),
            }
        }
    }
}
