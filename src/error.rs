use serde::Serialize;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("OCR service error: {0}")]
    ExternalService(String),

    #[error("path escapes the document root: {0}")]
    OutOfBounds(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl AppError {
    /// Status code a transport layer should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidArgument(_) | Self::OutOfBounds(_) => 400,
            Self::Conflict(_) | Self::ResourceBusy(_) => 409,
            Self::AccessDenied(_) => 403,
            Self::ExternalService(_) => 502,
            Self::Io(_) | Self::Serde(_) | Self::General(_) => 500,
        }
    }

    /// Classifies an I/O failure on `path` into the store's error taxonomy.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(format!("{path}: {err}")),
            _ if is_lock_error(&err) => Self::ResourceBusy(format!("{path}: {err}")),
            _ => Self::Io(err),
        }
    }
}

// EBUSY and ETXTBSY on unix, sharing and lock violations on windows.
fn is_lock_error(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) if cfg!(windows) => code == 32 || code == 33,
        Some(code) => code == 16 || code == 26,
        None => false,
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::General(format!("background task failed: {err}"))
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
