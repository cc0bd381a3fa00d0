//! github-backup - Mirror every repository of a GitHub organization locally
//!
//! Each run lists the organization's repositories through the GitHub API and
//! keeps one working copy per repository under a container directory: missing
//! repositories are cloned, existing ones have every remote branch checked out
//! and pulled. One broken repository never stops the rest of the backup.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration and per-run settings
//! - [`credentials`]: API token file with permission checks
//! - [`github`]: Paginated organization catalog
//! - [`git`]: Clone / update of a single repository
//! - [`process`]: Child process runner with live output streaming
//! - [`sync`]: Backup cycle orchestration
//! - [`daemon`]: Periodic mode

pub mod config;
pub mod credentials;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod git;
pub mod github;
pub mod layout;
pub mod lock;
pub mod process;
pub mod shutdown;
pub mod sync;

pub use config::{Config, RunConfig};
pub use discovery::{Discovery, RepoDescriptor};
pub use error::BackupError;
pub use git::{GitClient, SyncError, SyncResult};
pub use github::{CatalogFetchError, GitHubClient};
pub use shutdown::Shutdown;
pub use sync::{SyncEngine, SyncOutcome, SyncSummary};
