#![doc = "repo-analyst-core: repository ingestion pipeline for repo-analyst."]

//! Given a repository identifier and a user, the pipeline resolves an access
//! token, lists every file on the default branch through the hosting API,
//! fetches and decodes each file, and hands the concatenated corpus to an
//! analysis sink. Jobs run on a bounded worker pool, decoupled from whatever
//! triggered them.
//!
//! # Layout
//! - [`coordinates`]: `owner/name` parsing and validation
//! - [`contract`]: traits for the hosting API, credentials and the corpus sink
//! - [`github`]: GitHub REST implementation of the hosting API
//! - [`tree`], [`assemble`]: tree walk and corpus assembly
//! - [`job`]: the per-job orchestrator
//! - [`queue`]: job submission and the worker pool
//! - [`browse`]: read-only repository views
//! - [`credentials`], [`config`]: static credential table and tunables

pub mod assemble;
pub mod browse;
pub mod config;
pub mod contract;
pub mod coordinates;
pub mod credentials;
pub mod github;
pub mod job;
pub mod queue;
pub mod tree;

pub use assemble::{Assembly, Corpus, ContentAssembler};
pub use coordinates::{CoordinatesError, RepositoryCoordinates};
pub use job::{FailureKind, IngestionPipeline, JobId, JobOutcome};
pub use queue::{JobQueue, JobRequest, SubmitError, WorkerPool};
