//! Corpus sinks available to the binary.

use std::path::PathBuf;

use async_trait::async_trait;
use repo_analyst_core::assemble::Corpus;
use repo_analyst_core::contract::{CorpusSink, SinkError};
use repo_analyst_core::coordinates::RepositoryCoordinates;
use repo_analyst_core::job::JobId;
use tracing::info;

/// Records a summary of every corpus and discards the text. Stands in for
/// the analysis backend when none is wired up.
#[derive(Debug, Default)]
pub struct LoggingCorpusSink;

#[async_trait]
impl CorpusSink for LoggingCorpusSink {
    async fn accept(
        &self,
        job_id: JobId,
        repository: &RepositoryCoordinates,
        corpus: Corpus,
    ) -> Result<(), SinkError> {
        info!(
            job_id = %job_id,
            repo = %repository,
            files = corpus.paths().len(),
            bytes = corpus.len(),
            sha256 = %corpus.digest(),
            "[SINK] Corpus ready for analysis"
        );
        Ok(())
    }
}

/// Writes the corpus document to a single file, replacing its contents.
#[derive(Debug, Clone)]
pub struct FileCorpusSink {
    path: PathBuf,
}

impl FileCorpusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CorpusSink for FileCorpusSink {
    async fn accept(
        &self,
        job_id: JobId,
        repository: &RepositoryCoordinates,
        corpus: Corpus,
    ) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError(format!("creating {}: {e}", parent.display())))?;
        }
        let bytes = corpus.len();
        tokio::fs::write(&self.path, corpus.into_document())
            .await
            .map_err(|e| SinkError(format!("writing {}: {e}", self.path.display())))?;
        info!(
            job_id = %job_id,
            repo = %repository,
            bytes,
            path = %self.path.display(),
            "[SINK] Corpus written"
        );
        Ok(())
    }
}
