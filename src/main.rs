use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use github_backup::config::LoggingConfig;
use github_backup::credentials::{expand_token_path, read_token};
use github_backup::daemon::{parse_interval, run_periodic};
use github_backup::{BackupError, Config, GitHubClient, Shutdown, SyncEngine};

/// Exit status when `--strict` is on and a repository failed
const EXIT_REPO_FAILURES: i32 = 2;

const AFTER_HELP: &str = "\
note:
    If the local repo container directory does not exist, it is created.

example:
    github-backup --org-name mycompany --local-repodir /data/myrepos

prerequisites:
    Two credentials are needed. An API token lists the organization's
    repositories over HTTPS; a GitHub-registered ssh key performs the clone
    and pull operations. Cloning over HTTPS with the token would store the
    token in each working copy's .git/config, so it is never done.

    Put the token in ~/.ssh/github_api_token (or pass --token-file) and make
    both the file and its directory accessible to the owner only:

        chmod 700 ~/.ssh && chmod 600 ~/.ssh/github_api_token
";

#[derive(Parser)]
#[command(name = "github-backup")]
#[command(about = "Copy all of an organization's GitHub repositories to a local container directory")]
#[command(version)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// GitHub organization name
    #[arg(long)]
    org_name: Option<String>,

    /// File containing the GitHub API token [default: ~/.ssh/github_api_token]
    #[arg(long)]
    token_file: Option<String>,

    /// Local repository container directory [default: ./repo_backups]
    #[arg(long)]
    local_repodir: Option<String>,

    /// Run without actually updating local repos
    #[arg(long)]
    dry_run: bool,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit with status 2 when any repository failed
    #[arg(long)]
    strict: bool,

    /// Repeat the backup on this interval (e.g. 30m, 6h, 1d)
    #[arg(long)]
    interval: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = init_logging(cli.verbose, &logging) {
        eprintln!("failed to initialize logging: {:#}", e);
    }

    let code = match config {
        Ok(config) => match run(cli, config).await {
            Ok(code) => code,
            Err(e) => {
                let code = e
                    .downcast_ref::<BackupError>()
                    .map(BackupError::exit_code)
                    .unwrap_or(1);
                if code == 130 {
                    warn!("{:#}", e);
                } else {
                    error!("{:#}", e);
                }
                code
            }
        },
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    std::process::exit(code);
}

/// Initialize logging: RUST_LOG wins, then --verbose, then the config level
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr);

    if logging.format == "compact" {
        registry.with(layer.compact()).try_init()?;
    } else {
        registry.with(layer).try_init()?;
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Apply command line overrides, check credentials, then back up once or
/// periodically. Returns the process exit status.
async fn run(cli: Cli, mut config: Config) -> Result<i32> {
    info!("Starting github-backup v{}", env!("CARGO_PKG_VERSION"));

    if let Some(org) = cli.org_name {
        config.org_name = Some(org);
    }
    if let Some(token_file) = cli.token_file {
        config.token_file = token_file;
    }
    if let Some(dir) = cli.local_repodir {
        config.local_repodir = dir;
    }
    config.dry_run |= cli.dry_run;
    config.sync.fail_on_repo_errors |= cli.strict;
    if cli.interval.is_some() {
        config.sync.interval = cli.interval;
    }

    let interval = config
        .sync
        .interval
        .as_deref()
        .map(parse_interval)
        .transpose()
        .map_err(|e| BackupError::Config(format!("invalid interval: {:#}", e)))?;

    // The token is read before anything touches the network.
    let token_path = expand_token_path(&config.token_file).map_err(BackupError::from)?;
    let token = read_token(&token_path).map_err(BackupError::from)?;

    let run_config = config
        .resolve(token)
        .map_err(|e| BackupError::Config(format!("{:#}", e)))?;

    let discovery = GitHubClient::from_run_config(&run_config)
        .map_err(BackupError::from)
        .context("Failed to create GitHub client")?;

    let strict = run_config.sync.fail_on_repo_errors;
    let engine = SyncEngine::new(Arc::new(run_config), Box::new(discovery));
    let shutdown = Shutdown::on_ctrl_c();

    if let Some(every) = interval {
        run_periodic(&engine, every, shutdown).await?;
        return Ok(0);
    }

    let summary = engine.run(shutdown).await?;

    if summary.has_failures() {
        let failed: Vec<&str> = summary
            .outcomes
            .iter()
            .filter(|o| o.outcome.is_failure())
            .map(|o| o.repo.full_name.as_str())
            .collect();
        warn!("{} repositories failed: {}", failed.len(), failed.join(", "));

        if strict {
            return Ok(EXIT_REPO_FAILURES);
        }
    }

    Ok(0)
}
