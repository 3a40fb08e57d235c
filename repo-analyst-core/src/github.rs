//! GitHub REST implementation of [`RepositoryHost`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GitHubSettings;
use crate::contract::{
    AccessCredential, DirectoryEntry, FetchError, RepositoryHost, RepositoryMetadata,
    RepositorySummary, TreeEntry, TreeListing,
};
use crate::coordinates::RepositoryCoordinates;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Process-wide GitHub client. Cheap to share behind an `Arc`; the
/// credential is supplied per call.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
}

#[derive(Deserialize)]
struct TreeBody {
    #[serde(default)]
    tree: Option<Vec<TreeEntry>>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct BlobBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self, ClientError> {
        let api_base =
            Url::parse(&settings.api_base_url).map_err(|e| ClientError::InvalidBaseUrl {
                url: settings.api_base_url.clone(),
                reason: e.to_string(),
            })?;
        if api_base.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl {
                url: settings.api_base_url.clone(),
                reason: "URL cannot carry a path".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        debug!(
            api_base = %api_base,
            timeout_secs = settings.request_timeout().as_secs(),
            "Initialised GitHub client"
        );
        Ok(Self { http, api_base })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn repo_endpoint<'a>(
        &self,
        repository: &'a RepositoryCoordinates,
        rest: impl IntoIterator<Item = &'a str>,
    ) -> Url {
        self.endpoint(
            ["repos", repository.owner.as_str(), repository.name.as_str()]
                .into_iter()
                .chain(rest),
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        credential: &AccessCredential,
    ) -> Result<T, FetchError> {
        debug!(url = %url, "GitHub GET");
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(credential.bearer())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "GitHub resource not found");
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            let error = classify_failure(status, response.headers());
            warn!(url = %url, status = %status, error = %error, "GitHub request failed");
            return Err(error);
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Malformed(e.to_string())
            }
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(error.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn classify_failure(status: StatusCode, headers: &HeaderMap) -> FetchError {
    let exhausted = header_u64(headers, "x-ratelimit-remaining") == Some(0);
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
        return FetchError::RateLimited {
            reset_at: header_u64(headers, "x-ratelimit-reset"),
        };
    }
    FetchError::Status(status.as_u16())
}

/// Decodes a blob body. The API wraps base64 at 60 columns, so whitespace is
/// stripped before decoding. A body without content decodes to `""`.
fn decode_blob(content: Option<String>, encoding: Option<&str>) -> Result<String, FetchError> {
    let Some(content) = content else {
        return Ok(String::new());
    };
    match encoding {
        None | Some("base64") => {
            let compact: String = content
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            let bytes = STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| FetchError::Undecodable(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| FetchError::Undecodable(e.to_string()))
        }
        Some("utf-8") | Some("utf8") => Ok(content),
        Some(other) => Err(FetchError::Undecodable(format!(
            "unsupported encoding {other:?}"
        ))),
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_repository(
        &self,
        repository: &RepositoryCoordinates,
        credential: &AccessCredential,
    ) -> Result<RepositoryMetadata, FetchError> {
        let url = self.repo_endpoint(repository, []);
        self.get_json(url, credential).await
    }

    async fn get_tree(
        &self,
        repository: &RepositoryCoordinates,
        branch: &str,
        credential: &AccessCredential,
    ) -> Result<TreeListing, FetchError> {
        let mut url = self.repo_endpoint(
            repository,
            ["git", "trees"].into_iter().chain(branch.split('/')),
        );
        url.query_pairs_mut().append_pair("recursive", "1");

        let body: TreeBody = self.get_json(url, credential).await?;
        let entries = body
            .tree
            .ok_or_else(|| FetchError::Malformed("response has no `tree` field".to_string()))?;
        Ok(TreeListing {
            entries,
            truncated: body.truncated,
        })
    }

    async fn get_file_content(
        &self,
        url: &str,
        credential: &AccessCredential,
    ) -> Result<String, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::Malformed(e.to_string()))?;
        // The bearer token only ever goes back to the API it was issued for.
        if url.origin() != self.api_base.origin() {
            return Err(FetchError::Malformed(format!(
                "blob URL {url} is outside the API origin"
            )));
        }
        let body: BlobBody = self.get_json(url, credential).await?;
        decode_blob(body.content, body.encoding.as_deref())
    }

    async fn list_directory(
        &self,
        repository: &RepositoryCoordinates,
        path: &str,
        credential: &AccessCredential,
    ) -> Result<Vec<DirectoryEntry>, FetchError> {
        let trimmed = path.trim_matches('/');
        let url = if trimmed.is_empty() {
            self.repo_endpoint(repository, ["contents", ""])
        } else {
            self.repo_endpoint(repository, ["contents"].into_iter().chain(trimmed.split('/')))
        };
        self.get_json(url, credential).await
    }

    async fn list_repositories(
        &self,
        page: u32,
        per_page: u32,
        credential: &AccessCredential,
    ) -> Result<Vec<RepositorySummary>, FetchError> {
        let mut url = self.endpoint(["user", "repos"]);
        url.query_pairs_mut()
            .append_pair("page", &page.max(1).to_string())
            .append_pair("per_page", &per_page.clamp(1, 100).to_string())
            .append_pair("sort", "updated");
        self.get_json(url, credential).await
    }
}
