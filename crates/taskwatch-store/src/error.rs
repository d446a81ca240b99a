use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("config file {} has version {found:?}, this build expects {expected}", .path.display())]
    Version {
        path: PathBuf,
        found: Option<u64>,
        expected: u32,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to replace config file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl StoreError {
    /// Missing and incompatible files are both fixed by running setup again.
    pub fn needs_setup(&self) -> bool {
        matches!(self, StoreError::Missing(_) | StoreError::Version { .. })
    }
}
