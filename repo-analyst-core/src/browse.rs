use serde::Serialize;
use tracing::{debug, warn};

use crate::contract::{
    AccessCredential, ContentKind, DirectoryEntry, FetchError, RepositoryHost, RepositoryMetadata,
};
use crate::coordinates::RepositoryCoordinates;

/// Metadata, root listing and README of one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryOverview {
    pub repo: RepositoryMetadata,
    pub files: Vec<DirectoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

fn find_readme(files: &[DirectoryEntry]) -> Option<&DirectoryEntry> {
    files.iter().find(|entry| {
        entry.kind == ContentKind::File
            && entry.url.is_some()
            && entry.name.to_ascii_lowercase().starts_with("readme")
    })
}

/// Fetches metadata and the root listing concurrently, then the README if
/// the root has one. A missing repository is [`FetchError::NotFound`]; an
/// empty repository (no root listing) yields no files; an unreadable README
/// is left out.
pub async fn describe_repository(
    host: &dyn RepositoryHost,
    repository: &RepositoryCoordinates,
    credential: &AccessCredential,
) -> Result<RepositoryOverview, FetchError> {
    let (repo, root) = tokio::join!(
        host.get_repository(repository, credential),
        host.list_directory(repository, "", credential),
    );
    let repo = repo?;
    let files = match root {
        Ok(files) => files,
        Err(FetchError::NotFound) => Vec::new(),
        Err(e) => return Err(e),
    };

    let readme = match find_readme(&files).and_then(|entry| entry.url.as_deref()) {
        Some(url) => match host.get_file_content(url, credential).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(repo = %repository, error = %e, "README listed but could not be fetched");
                None
            }
        },
        None => None,
    };
    debug!(
        repo = %repository,
        files = files.len(),
        has_readme = readme.is_some(),
        "Described repository"
    );

    Ok(RepositoryOverview {
        repo,
        files,
        readme,
    })
}
