//! Local directory layout: one working copy per repository, named by its
//! short name, directly under the container directory.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::discovery::{DescriptorError, RepoDescriptor};
use crate::error::BackupError;

/// Make sure the container directory exists, creating it (and any parents)
/// if needed. In dry-run mode a missing directory is only reported.
pub fn ensure_container_dir(path: &Path, dry_run: bool) -> Result<(), BackupError> {
    if path.is_dir() {
        return Ok(());
    }

    if dry_run {
        warn!(
            "local_repodir={} does not exist, would create it",
            path.display()
        );
        return Ok(());
    }

    info!("creating local_repodir={}", path.display());
    std::fs::create_dir_all(path).map_err(|source| BackupError::ContainerDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Local working copy path for `repo`. The descriptor is validated first so
/// the result is always a direct child of `container`.
pub fn repo_path(container: &Path, repo: &RepoDescriptor) -> Result<PathBuf, DescriptorError> {
    repo.validate()?;
    Ok(container.join(&repo.name))
}
