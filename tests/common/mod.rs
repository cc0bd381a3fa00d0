//! Common test utilities: local bare remotes standing in for GitHub, a fixed
//! catalog, and token files.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use github_backup::config::{GitHubConfig, RunConfig, SyncConfig};
use github_backup::credentials::ApiToken;
use github_backup::github::CatalogFetchError;
use github_backup::{Discovery, RepoDescriptor};

pub const ORG: &str = "acme";

/// Catalog that always returns the same descriptors
pub struct StaticCatalog {
    pub repos: Vec<RepoDescriptor>,
}

#[async_trait]
impl Discovery for StaticCatalog {
    async fn discover(&self) -> Result<Vec<RepoDescriptor>, CatalogFetchError> {
        Ok(self.repos.clone())
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}

/// Run git synchronously in `dir`, panicking on failure; returns stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Backup Test",
            "-c",
            "user.email=backup-test@example.com",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");

    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Bare remotes under `<root>/remotes/acme/<name>.git`, seeded from scratch
/// clones under `<root>/seed/<name>`, and a container at `<root>/backups`
pub struct GitFixture {
    pub root: TempDir,
    pub remotes: PathBuf,
    pub seeds: PathBuf,
    pub container: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let remotes = root.path().join("remotes");
        let seeds = root.path().join("seed");
        std::fs::create_dir_all(remotes.join(ORG)).unwrap();
        std::fs::create_dir_all(&seeds).unwrap();

        Self {
            container: root.path().join("backups"),
            root,
            remotes,
            seeds,
        }
    }

    /// Prefix that turns `acme/<name>` into the bare remote's path
    pub fn clone_url_base(&self) -> String {
        format!("{}/", self.remotes.display())
    }

    pub fn remote_path(&self, name: &str) -> PathBuf {
        self.remotes.join(ORG).join(format!("{}.git", name))
    }

    pub fn local_path(&self, name: &str) -> PathBuf {
        self.container.join(name)
    }

    /// Create a remote with a commit on `main` and on each extra branch
    pub fn create_remote(&self, name: &str, branches: &[&str]) -> RepoDescriptor {
        let remote = self.remote_path(name);
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare", "--quiet"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = self.seeds.join(name);
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);

        std::fs::write(seed.join("README.md"), format!("# {}\n", name)).unwrap();
        git(&seed, &["add", "README.md"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);
        git(&seed, &["push", "--quiet", "origin", "main"]);

        for branch in branches {
            git(&seed, &["checkout", "--quiet", "-b", branch]);
            std::fs::write(seed.join(format!("{}.txt", branch)), *branch).unwrap();
            git(&seed, &["add", "."]);
            git(&seed, &["commit", "--quiet", "-m", &format!("work on {}", branch)]);
            git(&seed, &["push", "--quiet", "origin", branch]);
            git(&seed, &["checkout", "--quiet", "main"]);
        }

        RepoDescriptor::new(name, format!("{}/{}", ORG, name))
    }

    /// Push one more commit to `branch` of the remote; returns the new rev
    pub fn push_commit(&self, name: &str, branch: &str) -> String {
        let file = self.seeds.join(name).join("CHANGES");
        let mut contents = std::fs::read_to_string(&file).unwrap_or_default();
        contents.push_str("another change\n");
        self.push_file(name, branch, "CHANGES", &contents)
    }

    /// Commit `contents` at `rel_path` on `branch` and push it; returns the
    /// new rev
    pub fn push_file(&self, name: &str, branch: &str, rel_path: &str, contents: &str) -> String {
        let seed = self.seeds.join(name);
        git(&seed, &["checkout", "--quiet", branch, "--"]);

        let file = seed.join(rel_path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, contents).unwrap();

        git(&seed, &["add", "--", rel_path]);
        git(&seed, &["commit", "--quiet", "-m", &format!("update {}", rel_path)]);
        git(&seed, &["push", "--quiet", "origin", branch]);
        git(&seed, &["checkout", "--quiet", "main", "--"]);

        self.remote_rev(name, branch)
    }

    pub fn remote_rev(&self, name: &str, branch: &str) -> String {
        git(&self.remote_path(name), &["rev-parse", &format!("refs/heads/{}", branch)])
    }

    pub fn local_rev(&self, name: &str, branch: &str) -> String {
        git(&self.local_path(name), &["rev-parse", &format!("refs/heads/{}", branch)])
    }

    pub fn local_branches(&self, name: &str) -> Vec<String> {
        let out = git(
            &self.local_path(name),
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        );
        out.lines().map(str::to_string).collect()
    }

    pub fn run_config(&self, dry_run: bool) -> RunConfig {
        RunConfig {
            org_name: ORG.to_string(),
            token: ApiToken::new("unused"),
            local_repodir: self.container.clone(),
            dry_run,
            github: GitHubConfig {
                clone_url_base: self.clone_url_base(),
                ..GitHubConfig::default()
            },
            sync: SyncConfig::default(),
        }
    }
}

/// Write a token file inside a fresh owner-only directory with `mode`
#[cfg(unix)]
pub fn write_token_file(root: &Path, mode: u32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = root.join("secrets");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

    let token = dir.join("github_api_token");
    std::fs::write(&token, "ghp_example_token\n").unwrap();
    std::fs::set_permissions(&token, std::fs::Permissions::from_mode(mode)).unwrap();
    token
}
