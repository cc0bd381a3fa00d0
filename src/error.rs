//! Run-level error taxonomy.
//!
//! Only [`BackupError`] unwinds to the process boundary. Per-repository
//! failures are [`crate::git::SyncError`] values that the orchestrator records
//! and logs without propagating.

use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::github::CatalogFetchError;
use crate::lock::LockError;

/// Conditions that end a backup run.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Missing or invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("cannot create local_repodir={}: {source}", path.display())]
    ContainerDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Locked(#[from] LockError),

    #[error(transparent)]
    Catalog(#[from] CatalogFetchError),

    /// Operator interrupt; distinct from ordinary fatal errors.
    #[error("interrupt received, aborting")]
    Cancelled,
}

impl BackupError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Cancelled => 130,
            _ => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled)
    }
}
