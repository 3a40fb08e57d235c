#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repo_analyst_core::assemble::Corpus;
use repo_analyst_core::contract::{
    AccessCredential, CorpusSink, DirectoryEntry, FetchError, RepositoryHost, RepositoryMetadata,
    RepositorySummary, SinkError, TreeEntry, TreeListing,
};
use repo_analyst_core::coordinates::RepositoryCoordinates;
use repo_analyst_core::job::JobId;
use tokio::sync::{mpsc, Semaphore};

pub fn blob_url(path: &str) -> String {
    format!("https://api.test/blobs/{path}")
}

struct ScriptedBlob {
    delay: Duration,
    result: Result<String, FetchError>,
}

/// Hosting API fake with per-file delays, an optional start gate and call
/// accounting. Unknown URLs answer `NotFound`.
#[derive(Default)]
pub struct ScriptedHost {
    branch: String,
    metadata_error: Option<FetchError>,
    tree_error: Option<FetchError>,
    entries: Vec<TreeEntry>,
    blobs: HashMap<String, ScriptedBlob>,
    gate: Option<Arc<Semaphore>>,
    panic_message: Option<String>,
    started: Option<mpsc::UnboundedSender<RepositoryCoordinates>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            branch: "main".into(),
            ..Self::default()
        }
    }

    pub fn blob(self, path: &str, content: &str) -> Self {
        self.slow_blob(path, content, Duration::ZERO)
    }

    pub fn slow_blob(mut self, path: &str, content: &str, delay: Duration) -> Self {
        self.entries.push(TreeEntry::blob(path, blob_url(path)));
        self.blobs.insert(
            blob_url(path),
            ScriptedBlob {
                delay,
                result: Ok(content.to_string()),
            },
        );
        self
    }

    pub fn failing_blob(mut self, path: &str, error: FetchError) -> Self {
        self.entries.push(TreeEntry::blob(path, blob_url(path)));
        self.blobs.insert(
            blob_url(path),
            ScriptedBlob {
                delay: Duration::ZERO,
                result: Err(error),
            },
        );
        self
    }

    pub fn sized_blob(mut self, path: &str, content: &str, listed_size: u64) -> Self {
        self = self.blob(path, content);
        if let Some(entry) = self.entries.last_mut() {
            entry.size = Some(listed_size);
        }
        self
    }

    pub fn directory(mut self, path: &str) -> Self {
        self.entries.push(TreeEntry::directory(path));
        self
    }

    pub fn missing_repository(mut self) -> Self {
        self.metadata_error = Some(FetchError::NotFound);
        self
    }

    pub fn metadata_error(mut self, error: FetchError) -> Self {
        self.metadata_error = Some(error);
        self
    }

    pub fn tree_error(mut self, error: FetchError) -> Self {
        self.tree_error = Some(error);
        self
    }

    /// Metadata requests panic with `message`.
    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_message = Some(message.to_string());
        self
    }

    /// Metadata requests wait for a permit before answering.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reports every metadata request as it starts.
    pub fn notify_start(mut self, started: mpsc::UnboundedSender<RepositoryCoordinates>) -> Self {
        self.started = Some(started);
        self
    }

    pub fn entries(&self) -> Vec<TreeEntry> {
        self.entries.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryHost for ScriptedHost {
    async fn get_repository(
        &self,
        repository: &RepositoryCoordinates,
        _credential: &AccessCredential,
    ) -> Result<RepositoryMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = &self.started {
            let _ = started.send(repository.clone());
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate stays open");
        }
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }
        if let Some(error) = &self.metadata_error {
            return Err(error.clone());
        }
        Ok(RepositoryMetadata {
            full_name: repository.full_name(),
            default_branch: self.branch.clone(),
            private: false,
            description: None,
            html_url: None,
        })
    }

    async fn get_tree(
        &self,
        _repository: &RepositoryCoordinates,
        branch: &str,
        _credential: &AccessCredential,
    ) -> Result<TreeListing, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(branch, self.branch, "tree requested for the default branch");
        if let Some(error) = &self.tree_error {
            return Err(error.clone());
        }
        Ok(TreeListing {
            entries: self.entries.clone(),
            truncated: false,
        })
    }

    async fn get_file_content(
        &self,
        url: &str,
        _credential: &AccessCredential,
    ) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.blobs.get(url) {
            Some(blob) => {
                tokio::time::sleep(blob.delay).await;
                blob.result.clone()
            }
            None => Err(FetchError::NotFound),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_directory(
        &self,
        _repository: &RepositoryCoordinates,
        _path: &str,
        _credential: &AccessCredential,
    ) -> Result<Vec<DirectoryEntry>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn list_repositories(
        &self,
        _page: u32,
        _per_page: u32,
        _credential: &AccessCredential,
    ) -> Result<Vec<RepositorySummary>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Keeps every corpus it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub corpora: Mutex<Vec<(RepositoryCoordinates, String)>>,
}

impl RecordingSink {
    pub fn documents(&self) -> Vec<String> {
        self.corpora
            .lock()
            .unwrap()
            .iter()
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

#[async_trait]
impl CorpusSink for RecordingSink {
    async fn accept(
        &self,
        _job_id: JobId,
        repository: &RepositoryCoordinates,
        corpus: Corpus,
    ) -> Result<(), SinkError> {
        self.corpora
            .lock()
            .unwrap()
            .push((repository.clone(), corpus.into_document()));
        Ok(())
    }
}
