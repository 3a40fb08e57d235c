use thiserror::Error;
use tracing::{info, warn};

use crate::contract::{AccessCredential, FetchError, RepositoryHost, TreeEntry};
use crate::coordinates::RepositoryCoordinates;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("tree for {repository}@{branch} is unavailable: {source}")]
pub struct TreeUnavailable {
    pub repository: String,
    pub branch: String,
    #[source]
    pub source: FetchError,
}

/// Lists the fetchable files of one branch with a single recursive-tree
/// request. The provider does the traversal; nothing is retried here.
pub struct TreeWalker<'a> {
    host: &'a dyn RepositoryHost,
}

impl<'a> TreeWalker<'a> {
    pub fn new(host: &'a dyn RepositoryHost) -> Self {
        Self { host }
    }

    pub async fn walk(
        &self,
        repository: &RepositoryCoordinates,
        branch: &str,
        credential: &AccessCredential,
    ) -> Result<Vec<TreeEntry>, TreeUnavailable> {
        let listing = self
            .host
            .get_tree(repository, branch, credential)
            .await
            .map_err(|source| TreeUnavailable {
                repository: repository.full_name(),
                branch: branch.to_string(),
                source,
            })?;

        if listing.truncated {
            warn!(
                repo = %repository,
                branch,
                entries = listing.entries.len(),
                "[TREE] Provider truncated the tree listing; continuing with the entries received"
            );
        }

        let total = listing.entries.len();
        let blobs: Vec<TreeEntry> = listing
            .entries
            .into_iter()
            .filter(TreeEntry::is_fetchable_blob)
            .collect();
        info!(repo = %repository, branch, total, blobs = blobs.len(), "[TREE] Walked tree");
        Ok(blobs)
    }
}
