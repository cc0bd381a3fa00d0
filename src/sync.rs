//! Sync Engine - Orchestrates one backup cycle of an organization
//!
//! Fetches the repository catalog, orders it, and synchronizes each
//! repository in turn. A failing repository is logged and recorded; it never
//! stops the rest of the run. Only catalog, directory, lock and interrupt
//! conditions end a cycle early.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::discovery::{matches_exclusion_pattern, Discovery, RepoDescriptor};
use crate::error::BackupError;
use crate::git::{GitClient, SyncError, SyncResult};
use crate::layout;
use crate::lock::RunLock;
use crate::process::ProcessRunner;
use crate::shutdown::Shutdown;

/// What happened to one repository
#[derive(Debug)]
pub enum SyncOutcome {
    Synced(SyncResult),
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }
}

impl From<Result<SyncResult, SyncError>> for SyncOutcome {
    fn from(result: Result<SyncResult, SyncError>) -> Self {
        match result {
            Ok(r) => SyncOutcome::Synced(r),
            Err(e) => SyncOutcome::Failed(e),
        }
    }
}

#[derive(Debug)]
pub struct RepoOutcome {
    pub repo: RepoDescriptor,
    pub outcome: SyncOutcome,
}

/// Results from a complete backup cycle
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Repositories that were processed (excluded ones are not counted)
    pub total_repositories: usize,
    pub cloned: usize,
    pub updated: usize,
    pub failed: usize,
    pub excluded: usize,
    pub duration: Duration,
    /// Outcomes in processing order
    pub outcomes: Vec<RepoOutcome>,
}

impl SyncSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, repo: RepoDescriptor, outcome: SyncOutcome) {
        self.total_repositories += 1;
        match &outcome {
            SyncOutcome::Synced(SyncResult::Cloned { .. }) => self.cloned += 1,
            SyncOutcome::Synced(SyncResult::Updated { .. }) => self.updated += 1,
            SyncOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push(RepoOutcome { repo, outcome });
    }

    /// Names of the repositories in the order they were processed
    pub fn processed_names(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.repo.name.as_str()).collect()
    }
}

/// Drives backup cycles for one organization
pub struct SyncEngine {
    config: Arc<RunConfig>,
    discovery: Box<dyn Discovery>,
    git_client: GitClient,
}

impl SyncEngine {
    pub fn new(config: Arc<RunConfig>, discovery: Box<dyn Discovery>) -> Self {
        let git_client = GitClient::new(
            ProcessRunner::new(config.dry_run),
            config.github.clone_url_base.clone(),
            config.sync.clone(),
        );

        Self {
            config,
            discovery,
            git_client,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one complete cycle: container directory, lock, catalog, then every
    /// repository in name order
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<SyncSummary, BackupError> {
        let start_time = Instant::now();
        let run = self.config.as_ref();

        if run.dry_run {
            warn!("dry-run mode: no changes will be made");
        }

        if shutdown.is_requested() {
            return Err(BackupError::Cancelled);
        }

        layout::ensure_container_dir(&run.local_repodir, run.dry_run)?;

        let _lock = if run.dry_run {
            None
        } else {
            Some(RunLock::acquire(&run.local_repodir)?)
        };

        debug!(
            "Discovering repositories from {}",
            self.discovery.provider_name()
        );
        let catalog = tokio::select! {
            biased;
            _ = shutdown.requested() => return Err(BackupError::Cancelled),
            catalog = self.discovery.discover() => catalog?,
        };

        let mut summary = SyncSummary::default();
        let repositories = self.select_repositories(catalog, &mut summary);

        info!(
            "{} repositories to back up into {}",
            repositories.len(),
            run.local_repodir.display()
        );

        for repo in repositories {
            let result = tokio::select! {
                biased;
                _ = shutdown.requested() => {
                    warn!("interrupted while processing {}", repo.full_name);
                    return Err(BackupError::Cancelled);
                }
                result = self.git_client.sync_repository(&repo, &run.local_repodir) => result,
            };

            if let Err(e) = &result {
                log_repo_failure(&repo, e);
            }
            summary.record(repo, result.into());
        }

        summary.duration = start_time.elapsed();

        info!(
            "Backup completed in {:.2}s: {} repos, {} cloned, {} updated, {} failed, {} excluded",
            summary.duration.as_secs_f64(),
            summary.total_repositories,
            summary.cloned,
            summary.updated,
            summary.failed,
            summary.excluded
        );

        if run.dry_run {
            warn!("dry-run mode: no changes were made");
        }

        Ok(summary)
    }

    /// Drop excluded repositories and put the rest in a stable name order
    fn select_repositories(
        &self,
        catalog: Vec<RepoDescriptor>,
        summary: &mut SyncSummary,
    ) -> Vec<RepoDescriptor> {
        let patterns = &self.config.github.exclude_patterns;

        let (excluded, mut selected): (Vec<_>, Vec<_>) = catalog
            .into_iter()
            .partition(|repo| matches_exclusion_pattern(&repo.name, patterns));

        for repo in &excluded {
            info!("skipping excluded repo={}", repo.full_name);
        }
        summary.excluded = excluded.len();

        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected
    }
}

fn log_repo_failure(repo: &RepoDescriptor, err: &SyncError) {
    match err {
        SyncError::CommandFailed {
            command, output, ..
        } => {
            error!("error backing up repo={}: {}", repo.full_name, err);
            debug!("failed command: {}", command);
            for line in output {
                error!("{}: {}", repo.name, line);
            }
        }
        _ => error!("error backing up repo={}: {}", repo.full_name, err),
    }
}
