use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::discovery::{DescriptorError, RepoDescriptor};
use crate::layout;
use crate::process::{CommandLine, CommandResult, OutputMode, ProcessError, ProcessRunner};

/// Remote name used for every working copy
const ORIGIN: &str = "origin";

/// Git operations handler: clones missing repositories and pulls every
/// branch of existing ones
#[derive(Debug, Clone)]
pub struct GitClient {
    runner: ProcessRunner,
    clone_url_base: String,
    config: SyncConfig,
}

/// Local side of a repository, as far as the sync decision is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Absent,
    Present,
}

impl LocalState {
    pub fn of(path: &Path) -> Self {
        if path.exists() {
            LocalState::Present
        } else {
            LocalState::Absent
        }
    }
}

/// Successful result of a sync operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Repository was cloned (or would have been, in dry-run)
    Cloned { path: PathBuf },
    /// Every remote branch was checked out and pulled
    Updated { path: PathBuf, branches: Vec<String> },
}

impl SyncResult {
    pub fn path(&self) -> &Path {
        match self {
            SyncResult::Cloned { path } | SyncResult::Updated { path, .. } => path,
        }
    }
}

/// Why a single repository could not be synchronized
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("{} exists but is not a git working copy", path.display())]
    NotAWorkingCopy { path: PathBuf },

    #[error("remote URL mismatch in {}: expected {expected}, found {found}", path.display())]
    RemoteMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("`{command}` failed with {status}")]
    CommandFailed {
        command: String,
        status: String,
        /// Tail of the failed command's stdout and stderr
        output: Vec<String>,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl SyncError {
    /// The command line that failed, when the failure came from git
    pub fn command(&self) -> Option<&str> {
        match self {
            SyncError::CommandFailed { command, .. }
            | SyncError::Process(ProcessError::Spawn { command, .. })
            | SyncError::Process(ProcessError::Io { command, .. }) => Some(command.as_str()),
            _ => None,
        }
    }
}

impl GitClient {
    /// Create a new Git client; `clone_url_base` is joined with
    /// `<owner>/<name>.git` to form clone URLs
    pub fn new(runner: ProcessRunner, clone_url_base: impl Into<String>, config: SyncConfig) -> Self {
        Self {
            runner,
            clone_url_base: clone_url_base.into(),
            config,
        }
    }

    /// Remote URL for a repository
    pub fn clone_url(&self, repo: &RepoDescriptor) -> String {
        format!("{}{}.git", self.clone_url_base, repo.full_name)
    }

    /// Bring the local copy of `repo` under `container` in sync with the
    /// remote: clone when absent, otherwise update every branch.
    pub async fn sync_repository(
        &self,
        repo: &RepoDescriptor,
        container: &Path,
    ) -> Result<SyncResult, SyncError> {
        let repo_path = layout::repo_path(container, repo)?;

        match LocalState::of(&repo_path) {
            LocalState::Absent => self.clone_repository(repo, container, &repo_path).await,
            LocalState::Present => self.pull_all_branches(repo, &repo_path).await,
        }
    }

    /// Clone a repository into `repo_path`
    async fn clone_repository(
        &self,
        repo: &RepoDescriptor,
        container: &Path,
        repo_path: &Path,
    ) -> Result<SyncResult, SyncError> {
        info!("creating local_repo={}", repo_path.display());

        let clone_url = self.clone_url(repo);
        let cmd = CommandLine::new("git")
            .args(["clone", "--"])
            .arg(&clone_url)
            .arg(repo_path)
            .current_dir(container);
        self.run_checked(&cmd, OutputMode::Log).await?;

        if !self.runner.is_dry_run() {
            info!("Successfully cloned: {}", repo.full_name);
        }
        Ok(SyncResult::Cloned {
            path: repo_path.to_path_buf(),
        })
    }

    /// Check out and pull every remote-tracking branch of an existing clone
    async fn pull_all_branches(
        &self,
        repo: &RepoDescriptor,
        repo_path: &Path,
    ) -> Result<SyncResult, SyncError> {
        info!("updating local_repo={}, all branches", repo_path.display());

        if !self.runner.is_dry_run() {
            self.verify_working_copy(repo, repo_path).await?;
        }

        let fetch = self
            .git(repo_path)
            .args(["fetch", "--prune", ORIGIN]);
        self.run_checked(&fetch, OutputMode::Log).await?;

        let list = self.git(repo_path).args(["branch", "-r"]);
        let listing = self.run_checked(&list, OutputMode::Capture).await?;

        if !listing.executed() {
            info!(
                "would check out and pull each remote branch of {}",
                repo.full_name
            );
            return Ok(SyncResult::Updated {
                path: repo_path.to_path_buf(),
                branches: Vec::new(),
            });
        }

        let branches = parse_remote_branches(&listing.lines);
        debug!("{} remote branches in {}", branches.len(), repo.full_name);

        for branch in &branches {
            info!("updating repo={}, branch={}", repo.name, branch);

            // `--` keeps a branch named like a tracked path (e.g. `docs`)
            // from being read as a pathspec.
            let checkout = self
                .git(repo_path)
                .args(["checkout", branch.as_str(), "--"]);
            self.run_checked(&checkout, OutputMode::Log).await?;

            let mut pull = self.git(repo_path).arg("pull");
            if self.config.fast_forward_only {
                pull = pull.arg("--ff-only");
            }
            self.run_checked(&pull, OutputMode::Log).await?;
        }

        Ok(SyncResult::Updated {
            path: repo_path.to_path_buf(),
            branches,
        })
    }

    /// Refuse to touch a directory that isn't a clone of the expected remote
    async fn verify_working_copy(
        &self,
        repo: &RepoDescriptor,
        repo_path: &Path,
    ) -> Result<(), SyncError> {
        if !repo_path.join(".git").exists() {
            return Err(SyncError::NotAWorkingCopy {
                path: repo_path.to_path_buf(),
            });
        }

        if !self.config.verify_remote {
            return Ok(());
        }

        let expected = self.clone_url(repo);
        let get_url = self.git(repo_path).args(["remote", "get-url", ORIGIN]);
        let result = self.run_checked(&get_url, OutputMode::Capture).await?;
        let found = result
            .lines
            .first()
            .map(|l| l.trim().to_string())
            .unwrap_or_default();

        if !remote_urls_match(&found, &expected) {
            return Err(SyncError::RemoteMismatch {
                path: repo_path.to_path_buf(),
                expected,
                found,
            });
        }

        Ok(())
    }

    fn git(&self, repo_path: &Path) -> CommandLine {
        CommandLine::new("git").current_dir(repo_path)
    }

    /// Run a command and turn a non-zero exit into [`SyncError::CommandFailed`]
    async fn run_checked(
        &self,
        cmd: &CommandLine,
        mode: OutputMode,
    ) -> Result<CommandResult, SyncError> {
        let result = self.runner.run(cmd, mode).await?;

        if !result.success() {
            let status = result
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            warn!("`{}` failed with {}", cmd, status);
            return Err(SyncError::CommandFailed {
                command: cmd.to_string(),
                status,
                output: result.output_tail,
            });
        }

        Ok(result)
    }
}

/// Turn `git branch -r` output into local branch names: drop the symbolic
/// `origin/HEAD -> origin/main` entry and the `origin/` prefix. Entries for
/// other remotes, and names git would read as options, are skipped.
pub fn parse_remote_branches(lines: &[String]) -> Vec<String> {
    let prefix = format!("{}/", ORIGIN);

    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.contains(" -> "))
        .filter_map(|line| line.strip_prefix(prefix.as_str()))
        .filter(|branch| *branch != "HEAD")
        .filter(|branch| {
            if branch.starts_with('-') {
                warn!("Skipping branch with option-like name: {}", branch);
                false
            } else {
                true
            }
        })
        .map(str::to_string)
        .collect()
}

/// Compare remote URLs, treating ssh and https forms of the same GitHub
/// repository as equal
pub fn remote_urls_match(actual: &str, expected: &str) -> bool {
    let normalize = |url: &str| -> String {
        url.trim()
            .replace("git@github.com:", "https://github.com/")
            .replace("ssh://git@github.com/", "https://github.com/")
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_lowercase()
    };

    normalize(actual) == normalize(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_remote_branches_skips_head() {
        let output = lines(&[
            "  origin/HEAD -> origin/main",
            "  origin/feature/login",
            "  origin/main",
            "  origin/release-1.0",
        ]);

        assert_eq!(
            parse_remote_branches(&output),
            vec!["feature/login", "main", "release-1.0"]
        );
    }

    #[test]
    fn test_parse_remote_branches_ignores_noise() {
        let output = lines(&["", "  upstream/main", "  origin/-x", "  origin/HEAD", "  origin/dev"]);
        assert_eq!(parse_remote_branches(&output), vec!["dev"]);
    }

    #[test]
    fn test_parse_remote_branches_keeps_reported_order() {
        let output = lines(&["  origin/zeta", "  origin/alpha"]);
        assert_eq!(parse_remote_branches(&output), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_remote_url_matching() {
        assert!(remote_urls_match(
            "git@github.com:acme/repo.git",
            "https://github.com/acme/repo"
        ));
        assert!(remote_urls_match(
            "https://github.com/acme/Repo.git",
            "git@github.com:acme/repo.git"
        ));
        assert!(remote_urls_match(
            "/srv/remotes/acme/repo.git",
            "/srv/remotes/acme/repo.git"
        ));
        assert!(!remote_urls_match(
            "git@github.com:acme/repo1.git",
            "git@github.com:acme/repo2.git"
        ));
        assert!(!remote_urls_match("", "git@github.com:acme/repo.git"));
    }

    #[test]
    fn test_clone_url() {
        let git = GitClient::new(ProcessRunner::new(true), "git@github.com:", SyncConfig::default());
        let repo = RepoDescriptor::new("Hello-World", "octocat/Hello-World");
        assert_eq!(git.clone_url(&repo), "git@github.com:octocat/Hello-World.git");
    }

    #[test]
    fn test_local_state() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert_eq!(LocalState::of(temp.path()), LocalState::Present);
        assert_eq!(LocalState::of(&temp.path().join("missing")), LocalState::Absent);
    }

    #[tokio::test]
    async fn test_dry_run_clone_creates_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let git = GitClient::new(ProcessRunner::new(true), "git@github.com:", SyncConfig::default());
        let repo = RepoDescriptor::new("api", "acme/api");

        let result = git.sync_repository(&repo, temp.path()).await.unwrap();

        assert_eq!(
            result,
            SyncResult::Cloned {
                path: temp.path().join("api")
            }
        );
        temp.child("api").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_dry_run_update_leaves_directory_untouched() {
        let temp = assert_fs::TempDir::new().unwrap();
        // Not even a working copy: dry-run must not inspect it with git.
        temp.child("api/README").write_str("hello").unwrap();
        let git = GitClient::new(ProcessRunner::new(true), "git@github.com:", SyncConfig::default());
        let repo = RepoDescriptor::new("api", "acme/api");

        let result = git.sync_repository(&repo, temp.path()).await.unwrap();

        assert!(matches!(result, SyncResult::Updated { ref branches, .. } if branches.is_empty()));
        temp.child("api/.git").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_invalid_descriptor_fails_before_touching_disk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let git = GitClient::new(ProcessRunner::new(false), "git@github.com:", SyncConfig::default());
        let repo = RepoDescriptor::new("..", "acme/..");

        let err = git.sync_repository(&repo, temp.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidDescriptor(_)));
    }

    #[tokio::test]
    async fn test_present_directory_without_git_fails() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("api/README").write_str("hello").unwrap();
        let git = GitClient::new(ProcessRunner::new(false), "git@github.com:", SyncConfig::default());
        let repo = RepoDescriptor::new("api", "acme/api");

        let err = git.sync_repository(&repo, temp.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAWorkingCopy { .. }));
        assert!(err.command().is_none());
    }

    #[test]
    fn test_command_failed_reports_command() {
        let err = SyncError::CommandFailed {
            command: "git pull".to_string(),
            status: "exit status: 1".to_string(),
            output: vec![],
        };
        assert_eq!(err.command(), Some("git pull"));
        assert_eq!(err.to_string(), "`git pull` failed with exit status: 1");
    }
}
