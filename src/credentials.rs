//! API token file handling
//!
//! The token is read from a single file which, like an ssh private key, must
//! be readable by its owner only. Both the file and its parent directory are
//! checked before the contents are read.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Permission bits that must be clear on the token file and its directory.
const GROUP_OTHER_BITS: u32 = 0o077;

/// Errors raised while loading the API token
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing file {}, cannot proceed", path.display())]
    Missing { path: PathBuf },

    #[error(
        "bad permissions mode ({mode:o}) on directory {}, must be owner-access-only (e.g. 0700)",
        path.display()
    )]
    InsecureDirectory { path: PathBuf, mode: u32 },

    #[error(
        "bad permissions mode ({mode:o}) on file {}, must be owner-access-only (e.g. 0400)",
        path.display()
    )]
    InsecureFile { path: PathBuf, mode: u32 },

    #[error("cannot read value from {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token file {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("cannot expand token file path {path}: {message}")]
    Expand { path: String, message: String },
}

/// Bearer token for the GitHub API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(****)")
    }
}

/// Expand `~` and environment variables in a configured token file path.
pub fn expand_token_path(raw: &str) -> Result<PathBuf, CredentialError> {
    shellexpand::full(raw)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| CredentialError::Expand {
            path: raw.to_string(),
            message: e.to_string(),
        })
}

/// Read the API token from `path`, enforcing owner-only permissions.
pub fn read_token(path: &Path) -> Result<ApiToken, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::Missing {
            path: path.to_path_buf(),
        });
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    check_permissions(&parent, path)?;

    let contents = std::fs::read_to_string(path).map_err(|source| CredentialError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let token = contents.trim_end();
    if token.is_empty() {
        return Err(CredentialError::Empty {
            path: path.to_path_buf(),
        });
    }

    debug!("Loaded API token from {}", path.display());
    Ok(ApiToken::new(token))
}

#[cfg(unix)]
fn check_permissions(dir: &Path, file: &Path) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;

    let mode_of = |p: &Path| -> Result<u32, CredentialError> {
        std::fs::metadata(p)
            .map(|m| m.permissions().mode() & 0o777)
            .map_err(|source| CredentialError::Unreadable {
                path: p.to_path_buf(),
                source,
            })
    };

    let dir_mode = mode_of(dir)?;
    if dir_mode & GROUP_OTHER_BITS != 0 {
        return Err(CredentialError::InsecureDirectory {
            path: dir.to_path_buf(),
            mode: dir_mode,
        });
    }

    let file_mode = mode_of(file)?;
    if file_mode & GROUP_OTHER_BITS != 0 {
        return Err(CredentialError::InsecureFile {
            path: file.to_path_buf(),
            mode: file_mode,
        });
    }

    Ok(())
}

// Permission bits have no equivalent outside unix.
#[cfg(not(unix))]
fn check_permissions(_dir: &Path, _file: &Path) -> Result<(), CredentialError> {
    let _ = GROUP_OTHER_BITS;
    Ok(())
}
