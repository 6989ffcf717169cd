use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImportError>;

/// Structured failures of a project import.
///
/// `InvalidRequest` and `InvalidFileFormat` are user-correctable, the other
/// two are server-side.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid project data: {0}")]
    InvalidRequest(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Persistence failure while {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Unexpected import error: {0}")]
    Unexpected(String),
}

impl ImportError {
    pub fn invalid_format(message: impl Into<String>) -> Self {
        ImportError::InvalidFileFormat(message.into())
    }

    pub fn persistence(context: impl Into<String>, source: sqlx::Error) -> Self {
        ImportError::Persistence {
            context: context.into(),
            source,
        }
    }

    /// True for errors caused by the uploaded data rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ImportError::InvalidRequest(_) | ImportError::InvalidFileFormat(_)
        )
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::Unexpected(format!("failed to read workbook: {}", err))
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Unexpected(format!("I/O error: {}", err))
    }
}
