//! # contract: seams between the ingestion pipeline and the outside world
//!
//! The pipeline talks to three collaborators it does not own:
//!
//! - a repository hosting API ([`RepositoryHost`]), implemented for GitHub by
//!   [`crate::github::GitHubClient`];
//! - a credential source ([`CredentialResolver`]) mapping a user identity to a
//!   provider token;
//! - the downstream analysis step ([`CorpusSink`]) that receives the assembled
//!   corpus.
//!
//! Each trait is async and object safe so the orchestrator can hold them as
//! `Arc<dyn _>`. The traits are annotated for `mockall`, and the generated
//! mocks are exported under the `test-export-mocks` feature so the binary
//! crate's tests can use them too.
//!
//! ## Error surface
//! Remote failures are reported as [`FetchError`]. A `404` is always
//! [`FetchError::NotFound`]; everything else is a transient outcome the caller
//! decides how to absorb.

use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assemble::Corpus;
use crate::coordinates::RepositoryCoordinates;
use crate::job::JobId;

/// Bearer token for one user on one provider. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(<redacted>)")
    }
}

/// Hosting providers a credential can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
        }
    }
}

/// Repository metadata as returned by `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// One entry of the authenticated user's repository listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Kind of a git tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodule pointers and anything the provider may add later.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
            url: Some(url.into()),
            size: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Tree,
            url: None,
            size: None,
        }
    }

    pub fn is_fetchable_blob(&self) -> bool {
        self.kind == EntryKind::Blob && self.url.is_some()
    }
}

/// Result of one recursive tree request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeListing {
    pub entries: Vec<TreeEntry>,
    /// Set when the provider cut the listing short.
    pub truncated: bool,
}

/// Kind of an entry in a directory listing (contents API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A decoded file, between fetch and assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub raw_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("resource not found")]
    NotFound,
    #[error("rate limit exhausted (resets at {reset_at:?})")]
    RateLimited { reset_at: Option<u64> },
    #[error("remote API answered with status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("content could not be decoded: {0}")]
    Undecodable(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("credential lookup failed: {0}")]
pub struct CredentialError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("corpus hand-off failed: {0}")]
pub struct SinkError(pub String);

/// Read access to a repository hosting API.
///
/// Every method issues exactly one request with the caller's credential.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Repository metadata, including the default branch.
    async fn get_repository(
        &self,
        repository: &RepositoryCoordinates,
        credential: &AccessCredential,
    ) -> Result<RepositoryMetadata, FetchError>;

    /// Recursive listing of every entry under `branch`.
    async fn get_tree(
        &self,
        repository: &RepositoryCoordinates,
        branch: &str,
        credential: &AccessCredential,
    ) -> Result<TreeListing, FetchError>;

    /// Raw content of one blob, decoded to UTF-8.
    async fn get_file_content(
        &self,
        url: &str,
        credential: &AccessCredential,
    ) -> Result<String, FetchError>;

    /// Entries of one directory (use `""` for the repository root).
    async fn list_directory(
        &self,
        repository: &RepositoryCoordinates,
        path: &str,
        credential: &AccessCredential,
    ) -> Result<Vec<DirectoryEntry>, FetchError>;

    /// One page of the credential owner's repositories, most recently updated first.
    async fn list_repositories(
        &self,
        page: u32,
        per_page: u32,
        credential: &AccessCredential,
    ) -> Result<Vec<RepositorySummary>, FetchError>;
}

/// Maps a user identity to a provider token.
///
/// `Ok(None)` means the user never connected the provider; it is an expected
/// outcome, not an error.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<AccessCredential>, CredentialError>;
}

/// Downstream consumer of an assembled corpus (the analysis step).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CorpusSink: Send + Sync {
    async fn accept(
        &self,
        job_id: JobId,
        repository: &RepositoryCoordinates,
        corpus: Corpus,
    ) -> Result<(), SinkError>;
}
