//! Top-level ingestion job: credential → metadata → tree → corpus → sink.
//!
//! One job is one sequential pipeline for one repository. The orchestrator
//! never returns an error: whatever happens inside (including a panic or an
//! overrun of the job deadline) is folded into a [`JobOutcome`] and logged,
//! because the request that triggered the job has already been answered.
//!
//! # States
//! `Starting → ResolvingCredential → FetchingMetadata → FetchingTree →
//! Assembling → Completed | Failed`. A failed job is not resumed; a new
//! trigger starts again from `Starting`.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assemble::ContentAssembler;
use crate::config::{AssemblySettings, JobSettings, PipelineConfig};
use crate::contract::{CorpusSink, CredentialResolver, FetchError, Provider, RepositoryHost};
use crate::coordinates::RepositoryCoordinates;
use crate::tree::TreeWalker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Starting,
    ResolvingCredential,
    FetchingMetadata,
    FetchingTree,
    Assembling,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    CredentialMissing,
    RepositoryNotFound,
    TreeUnavailable,
    DeadlineExceeded,
    Unexpected(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::CredentialMissing => f.write_str("CredentialMissing"),
            FailureKind::RepositoryNotFound => f.write_str("RepositoryNotFound"),
            FailureKind::TreeUnavailable => f.write_str("TreeUnavailable"),
            FailureKind::DeadlineExceeded => f.write_str("DeadlineExceeded"),
            FailureKind::Unexpected(detail) => write!(f, "Unexpected({detail})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { corpus_size: usize },
    Failed(FailureKind),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { corpus_size } => write!(f, "Completed({corpus_size})"),
            JobOutcome::Failed(kind) => write!(f, "Failed({kind})"),
        }
    }
}

/// Everything one job needs, constructed once per process and shared by the
/// worker pool.
pub struct IngestionPipeline {
    host: Arc<dyn RepositoryHost>,
    credentials: Arc<dyn CredentialResolver>,
    sink: Arc<dyn CorpusSink>,
    assembly: AssemblySettings,
    job: JobSettings,
}

fn advance(state: &mut JobState, next: JobState) {
    debug!(from = ?*state, to = ?next, "[JOB] State transition");
    *state = next;
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}

impl IngestionPipeline {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        credentials: Arc<dyn CredentialResolver>,
        sink: Arc<dyn CorpusSink>,
    ) -> Self {
        Self {
            host,
            credentials,
            sink,
            assembly: AssemblySettings::default(),
            job: JobSettings::default(),
        }
    }

    pub fn from_config(
        host: Arc<dyn RepositoryHost>,
        credentials: Arc<dyn CredentialResolver>,
        sink: Arc<dyn CorpusSink>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(host, credentials, sink)
            .with_assembly(config.assembly.clone())
            .with_job_settings(config.job.clone())
    }

    pub fn with_assembly(mut self, assembly: AssemblySettings) -> Self {
        self.assembly = assembly;
        self
    }

    pub fn with_job_settings(mut self, job: JobSettings) -> Self {
        self.job = job;
        self
    }

    pub fn host(&self) -> &Arc<dyn RepositoryHost> {
        &self.host
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialResolver> {
        &self.credentials
    }

    /// Runs one job to a terminal outcome. Never panics and never returns an
    /// error; the outcome is also logged.
    pub async fn run(
        &self,
        job_id: JobId,
        user_id: &str,
        repository: &RepositoryCoordinates,
    ) -> JobOutcome {
        let span = info_span!("ingestion_job", job_id = %job_id, repo = %repository);
        async move {
            info!(user_id, "[JOB] Starting ingestion");
            let mut state = JobState::Starting;

            let stages = AssertUnwindSafe(self.run_stages(job_id, user_id, repository, &mut state))
                .catch_unwind();
            let result = match tokio::time::timeout(self.job.deadline(), stages).await {
                Err(_) => Err(FailureKind::DeadlineExceeded),
                Ok(Err(payload)) => Err(FailureKind::Unexpected(panic_detail(payload.as_ref()))),
                Ok(Ok(result)) => result,
            };

            match result {
                Ok(corpus_size) => {
                    advance(&mut state, JobState::Completed);
                    info!(corpus_size, "[JOB] Finished: Completed");
                    JobOutcome::Completed { corpus_size }
                }
                Err(kind) => {
                    error!(failed_in = ?state, outcome = %kind, "[JOB] Finished: Failed");
                    advance(&mut state, JobState::Failed);
                    JobOutcome::Failed(kind)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        job_id: JobId,
        user_id: &str,
        repository: &RepositoryCoordinates,
        state: &mut JobState,
    ) -> Result<usize, FailureKind> {
        advance(state, JobState::ResolvingCredential);
        let credential = match self
            .credentials
            .resolve_token(user_id, Provider::GitHub)
            .await
        {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                warn!(user_id, provider = Provider::GitHub.as_str(), "[JOB] No access token for user");
                return Err(FailureKind::CredentialMissing);
            }
            Err(e) => return Err(FailureKind::Unexpected(e.to_string())),
        };

        advance(state, JobState::FetchingMetadata);
        let metadata = self
            .host
            .get_repository(repository, &credential)
            .await
            .map_err(|e| match e {
                FetchError::NotFound => FailureKind::RepositoryNotFound,
                other => FailureKind::Unexpected(format!("repository metadata: {other}")),
            })?;
        info!(default_branch = %metadata.default_branch, "[JOB] Fetched repository metadata");

        advance(state, JobState::FetchingTree);
        let entries = TreeWalker::new(self.host.as_ref())
            .walk(repository, &metadata.default_branch, &credential)
            .await
            .map_err(|e| {
                warn!(error = %e, "[JOB] Tree fetch failed");
                FailureKind::TreeUnavailable
            })?;

        advance(state, JobState::Assembling);
        let assembly = ContentAssembler::new(self.host.as_ref())
            .with_concurrency(self.assembly.concurrency)
            .with_limits(self.assembly.limits())
            .assemble(&entries, &credential)
            .await;

        let corpus_size = assembly.corpus.len();
        info!(
            corpus_size,
            files = assembly.corpus.paths().len(),
            skipped = assembly.skipped.len(),
            digest = %assembly.corpus.digest(),
            "[JOB] Corpus ready for analysis"
        );

        self.sink
            .accept(job_id, repository, assembly.corpus)
            .await
            .map_err(|e| FailureKind::Unexpected(e.to_string()))?;

        Ok(corpus_size)
    }
}
