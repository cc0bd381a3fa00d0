use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::credentials::ApiToken;
use crate::discovery::is_safe_component;

/// Main configuration structure for github-backup
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// GitHub organization whose repositories are mirrored
    #[serde(default)]
    pub org_name: Option<String>,

    /// File containing the GitHub API token
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Local repository container directory
    #[serde(default = "default_local_repodir")]
    pub local_repodir: String,

    /// Run without actually updating local repos
    #[serde(default)]
    pub dry_run: bool,

    /// GitHub API and remote settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GitHubConfig {
    /// Base URL of the REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Prefix joined with `<owner>/<name>.git` to form clone URLs
    #[serde(default = "default_clone_url_base")]
    pub clone_url_base: String,

    /// User-Agent sent with API requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Repository exclusion patterns
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Whole-request timeout for API calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// TCP/TLS connect timeout for API calls, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Fast-forward only pulls
    #[serde(default)]
    pub fast_forward_only: bool,

    /// Refuse to pull when `origin` doesn't point at the expected remote
    #[serde(default = "default_true")]
    pub verify_remote: bool,

    /// Exit non-zero when any repository failed
    #[serde(default)]
    pub fail_on_repo_errors: bool,

    /// Repeat the backup on this interval ("30m", "6h")
    #[serde(default)]
    pub interval: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "full" or "compact"
}

// Default value functions
fn default_token_file() -> String {
    "~/.ssh/github_api_token".to_string()
}
fn default_local_repodir() -> String {
    "./repo_backups".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_clone_url_base() -> String {
    "git@github.com:".to_string()
}
fn default_user_agent() -> String {
    format!("github-backup/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "full".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            clone_url_base: default_clone_url_base(),
            user_agent: default_user_agent(),
            exclude_patterns: Vec::new(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fast_forward_only: false,
            verify_remote: default_true(),
            fail_on_repo_errors: false,
            interval: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            org_name: None,
            token_file: default_token_file(),
            local_repodir: default_local_repodir(),
            dry_run: false,
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Settings for one backup run, fixed before any repository work starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub org_name: String,
    pub token: ApiToken,
    /// Absolute, normalized container directory
    pub local_repodir: PathBuf,
    pub dry_run: bool,
    pub github: GitHubConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        // Paths stay raw here; they are expanded once, where they are used.
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("github-backup").join("config.yml"))
    }

    /// Freeze this configuration into the settings of a single run.
    pub fn resolve(&self, token: ApiToken) -> Result<RunConfig> {
        let org_name = self
            .org_name
            .as_deref()
            .map(str::trim)
            .filter(|org| !org.is_empty())
            .ok_or_else(|| anyhow!("organization name is not set (use --org-name or org_name)"))?
            .to_string();
        if !is_safe_component(&org_name) {
            bail!("invalid organization name: {:?}", org_name);
        }

        Ok(RunConfig {
            org_name,
            token,
            local_repodir: absolute_path(&self.local_repodir)?,
            dry_run: self.dry_run,
            github: self.github.clone(),
            sync: self.sync.clone(),
        })
    }
}

/// Expand, absolutize and normalize a directory path.
pub fn absolute_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    let path = PathBuf::from(expanded.as_ref());

    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };

    Ok(path_clean::clean(absolute))
}
