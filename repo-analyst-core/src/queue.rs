//! Bounded job queue drained by a fixed pool of workers.
//!
//! The HTTP trigger only ever calls [`JobQueue::submit`], which never waits:
//! a job is either accepted into the channel or rejected on the spot. Workers
//! pull jobs one at a time and run them through the shared
//! [`IngestionPipeline`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::QueueSettings;
use crate::coordinates::RepositoryCoordinates;
use crate::job::{IngestionPipeline, JobId, JobOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub user_id: String,
    pub repository: RepositoryCoordinates,
}

impl JobRequest {
    pub fn new(user_id: impl Into<String>, repository: RepositoryCoordinates) -> Self {
        Self {
            user_id: user_id.into(),
            repository,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("job queue is full")]
    QueueFull,
    #[error("a job for {0} is already queued or running")]
    AlreadyQueued(String),
    #[error("job queue is shutting down")]
    ShuttingDown,
}

/// Terminal outcome of one queued job, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub request: JobRequest,
    pub outcome: JobOutcome,
}

type InFlightKey = (String, RepositoryCoordinates);

#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<InFlightKey>>>);

/// Releases its key when the job it belongs to is finished or rejected.
struct InFlightGuard {
    set: InFlight,
    key: InFlightKey,
}

impl InFlight {
    fn claim(&self, request: &JobRequest) -> Result<InFlightGuard, SubmitError> {
        let key = (request.user_id.clone(), request.repository.clone());
        let mut keys = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !keys.insert(key.clone()) {
            return Err(SubmitError::AlreadyQueued(request.repository.full_name()));
        }
        Ok(InFlightGuard {
            set: self.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self
            .set
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.remove(&self.key);
    }
}

struct QueuedJob {
    id: JobId,
    request: JobRequest,
    guard: Option<InFlightGuard>,
}

type Receiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>;

/// Submission handle. Clone it freely; the workers stop once every handle
/// is dropped and the queue is drained.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    in_flight: Option<InFlight>,
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    pub fn start(pipeline: Arc<IngestionPipeline>, settings: &QueueSettings) -> (Self, WorkerPool) {
        Self::spawn(pipeline, settings, None)
    }

    /// Like [`JobQueue::start`], additionally reporting every terminal
    /// outcome to `observer`.
    pub fn start_observed(
        pipeline: Arc<IngestionPipeline>,
        settings: &QueueSettings,
        observer: mpsc::UnboundedSender<JobReport>,
    ) -> (Self, WorkerPool) {
        Self::spawn(pipeline, settings, Some(observer))
    }

    fn spawn(
        pipeline: Arc<IngestionPipeline>,
        settings: &QueueSettings,
        observer: Option<mpsc::UnboundedSender<JobReport>>,
    ) -> (Self, WorkerPool) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let rx: Receiver = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&pipeline),
                    Arc::clone(&rx),
                    observer.clone(),
                ))
            })
            .collect::<Vec<_>>();
        info!(
            workers = workers.len(),
            capacity = settings.capacity.max(1),
            deduplicate_in_flight = settings.deduplicate_in_flight,
            "[QUEUE] Worker pool started"
        );

        let queue = JobQueue {
            tx,
            in_flight: settings.deduplicate_in_flight.then(InFlight::default),
        };
        (queue, WorkerPool { workers })
    }

    /// Enqueues a job without waiting and returns its id.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        let guard = match &self.in_flight {
            Some(in_flight) => Some(in_flight.claim(&request)?),
            None => None,
        };

        let id = JobId::new();
        let repository = request.repository.full_name();
        match self.tx.try_send(QueuedJob { id, request, guard }) {
            Ok(()) => {
                info!(job_id = %id, repo = %repository, "[QUEUE] Job accepted");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                warn!(repo = %repository, "[QUEUE] Rejecting job: queue is full");
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::ShuttingDown),
        }
    }
}

impl WorkerPool {
    /// Waits for every worker to finish. Workers exit once all [`JobQueue`]
    /// handles are dropped and the remaining jobs have run.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "[QUEUE] Worker task ended abnormally");
            }
        }
        info!("[QUEUE] Worker pool drained");
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: Arc<IngestionPipeline>,
    rx: Receiver,
    observer: Option<mpsc::UnboundedSender<JobReport>>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(QueuedJob { id, request, guard }) = next else {
            break;
        };

        debug!(worker, job_id = %id, "[QUEUE] Worker picked up job");
        let outcome = pipeline
            .run(id, &request.user_id, &request.repository)
            .await;
        drop(guard);

        if let Some(observer) = &observer {
            let _ = observer.send(JobReport {
                job_id: id,
                request,
                outcome,
            });
        }
    }
    debug!(worker, "[QUEUE] Worker stopped");
}
