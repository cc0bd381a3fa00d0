//! Repository discovery abstraction layer
//!
//! The orchestrator only sees the [`Discovery`] trait, so the catalog can come
//! from the GitHub API in production and from a fixed list in tests.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::github::CatalogFetchError;

/// One repository as reported by the listing API.
///
/// Both fields come from the network and are untrusted until
/// [`RepoDescriptor::validate`] has accepted them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct RepoDescriptor {
    /// Short repository name, used as the local directory name
    pub name: String,

    /// Owner-qualified identity (`owner/name`), used for clone URLs
    pub full_name: String,
}

/// Reasons a descriptor is unfit for building paths or git arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("unsafe repository name {0:?}")]
    UnsafeName(String),

    #[error("unsafe owner in full_name {0:?}")]
    UnsafeOwner(String),

    #[error("full_name {full_name:?} does not end with repository name {name:?}")]
    NameMismatch { name: String, full_name: String },
}

impl RepoDescriptor {
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
        }
    }

    /// Check that `name` is a single safe path component and that
    /// `full_name` is exactly `<owner>/<name>`.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if !is_safe_component(&self.name) {
            return Err(DescriptorError::UnsafeName(self.name.clone()));
        }

        let (owner, name) = self.full_name.split_once('/').ok_or_else(|| {
            DescriptorError::NameMismatch {
                name: self.name.clone(),
                full_name: self.full_name.clone(),
            }
        })?;

        if !is_safe_component(owner) {
            return Err(DescriptorError::UnsafeOwner(self.full_name.clone()));
        }

        if name != self.name {
            return Err(DescriptorError::NameMismatch {
                name: self.name.clone(),
                full_name: self.full_name.clone(),
            });
        }

        Ok(())
    }

    /// Owner part of `full_name`
    pub fn owner(&self) -> Option<&str> {
        self.full_name.split_once('/').map(|(owner, _)| owner)
    }
}

/// A path component GitHub could have produced and git can't mistake for an
/// option: `[A-Za-z0-9._-]+`, not `.` or `..`, not starting with `-`.
pub(crate) fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.starts_with('-')
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Source of the complete repository catalog for one run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Fetch every repository descriptor. Partial results are never returned.
    async fn discover(&self) -> Result<Vec<RepoDescriptor>, CatalogFetchError>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

/// Check if repository name matches any exclusion pattern
pub fn matches_exclusion_pattern(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        // Simple glob pattern matching
        if pattern.contains('*') {
            let pattern_regex = regex::escape(pattern).replace(r"\*", ".*");

            regex::Regex::new(&format!("^{}$", pattern_regex))
                .map(|re| re.is_match(name))
                .unwrap_or(false)
        } else {
            name == pattern
        }
    })
}
