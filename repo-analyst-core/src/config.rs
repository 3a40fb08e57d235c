use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assemble::AssemblyLimits;

const MIB: u64 = 1024 * 1024;

/// Tunables for the whole ingestion pipeline. Every field has a default so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub github: GitHubSettings,
    pub assembly: AssemblySettings,
    pub job: JobSettings,
    pub queue: QueueSettings,
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            api_base_url = %self.github.api_base_url,
            request_timeout_secs = self.github.request_timeout_secs,
            concurrency = self.assembly.concurrency,
            job_deadline_secs = self.job.deadline_secs,
            workers = self.queue.workers,
            queue_capacity = self.queue.capacity,
            deduplicate_in_flight = self.queue.deduplicate_in_flight,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub api_base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            user_agent: concat!("repo-analyst/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl GitHubSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    /// Blob fetches in flight per job. `1` fetches strictly one after another.
    pub concurrency: usize,
    pub max_file_bytes: Option<u64>,
    pub max_corpus_bytes: Option<u64>,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_file_bytes: Some(MIB),
            max_corpus_bytes: Some(32 * MIB),
        }
    }
}

impl AssemblySettings {
    pub fn limits(&self) -> AssemblyLimits {
        AssemblyLimits {
            max_file_bytes: self.max_file_bytes,
            max_corpus_bytes: self.max_corpus_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Overall budget for one job, from credential lookup to hand-off.
    pub deadline_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self { deadline_secs: 600 }
    }
}

impl JobSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
    /// Reject a submission while a job for the same user and repository is
    /// queued or running.
    pub deduplicate_in_flight: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 64,
            deduplicate_in_flight: false,
        }
    }
}
