use crate::store::QueueStore;
use deployq::{
    Admission, Advance, DeployJob, Dispatch, DqError, DqResult, JobId, JobOutcome, JobRecord,
};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// What happens to jobs left in the store by a previous process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupPolicy {
    /// Wipe the store. Queued and in-flight jobs of the previous run are lost.
    #[default]
    Flush,
    /// Keep the store and re-dispatch jobs that were in flight when it stopped.
    Recover,
}

impl FromStr for StartupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flush" => Ok(StartupPolicy::Flush),
            "recover" => Ok(StartupPolicy::Recover),
            other => Err(format!("unknown startup policy '{other}', expected flush or recover")),
        }
    }
}

impl fmt::Display for StartupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupPolicy::Flush => f.write_str("flush"),
            StartupPolicy::Recover => f.write_str("recover"),
        }
    }
}

/// Serializes jobs per server.
///
/// Admission (`queued` -> `active`) happens inside the store when a job is
/// enqueued to an idle group or when the group's active job completes, so a
/// group never has two active jobs no matter how many workers pull from it.
#[derive(Clone)]
pub struct GroupScheduler {
    store: Arc<dyn QueueStore>,
    max_pending: usize,
    // taken from the store but not yet handed out, retried before new ids
    taken: Arc<Mutex<VecDeque<JobId>>>,
}

impl GroupScheduler {
    /// Applies `policy` to the store and returns a scheduler ready for enqueues.
    pub async fn start(store: Arc<dyn QueueStore>, policy: StartupPolicy) -> DqResult<Self> {
        match policy {
            StartupPolicy::Flush => {
                store.flush().await?;
                tracing::info!("queue store flushed");
            }
            StartupPolicy::Recover => {
                let recovered = store.recover().await?;
                if recovered > 0 {
                    tracing::warn!(recovered, "re-dispatching jobs interrupted by the last shutdown");
                } else {
                    tracing::info!("queue store kept, nothing to recover");
                }
            }
        }

        Ok(Self::new(store))
    }

    /// Wraps a store without touching its contents.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            max_pending: 0,
            taken: Arc::default(),
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub async fn enqueue(&self, job: DeployJob) -> DqResult<Admission> {
        let admission = self.store.enqueue(&job, self.max_pending).await?;

        match admission {
            Admission::Active(id) => {
                tracing::info!(job_id = %id, server_id = %job.server_id, "job admitted");
            }
            Admission::Queued { id, position } => {
                tracing::info!(
                    job_id = %id,
                    server_id = %job.server_id,
                    position,
                    "job queued behind active deployment"
                );
            }
        }

        Ok(admission)
    }

    /// Waits up to `wait` for an admitted job.
    ///
    /// An id whose payload cannot be read stays with the scheduler and is
    /// handed out by a later call, so its group is never left holding a slot
    /// for a job no worker has.
    pub async fn next_dispatch(&self, wait: Duration) -> DqResult<Option<Dispatch>> {
        let retry = self.taken.lock().await.pop_front();
        let id = match retry {
            Some(id) => id,
            None => match self.store.next_ready(wait).await? {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        match self.store.payload(id).await {
            Ok(Some(job)) => Ok(Some(Dispatch { id, job })),
            Ok(None) => {
                tracing::warn!(job_id = %id, "admitted job has no payload, skipped");
                Err(DqError::InvalidJobData(format!("job {id} has no payload")))
            }
            Err(err) => {
                self.taken.lock().await.push_back(id);
                Err(err)
            }
        }
    }

    /// Records the outcome of an active job and admits the next one of its group.
    pub async fn complete(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> DqResult<Advance> {
        let advance = self.store.complete(dispatch, outcome).await?;

        match advance {
            Advance::Advanced(next) => {
                tracing::debug!(
                    job_id = %dispatch.id,
                    server_id = %dispatch.job.server_id,
                    next_job_id = %next,
                    "group advanced"
                );
            }
            Advance::Idle => {
                tracing::debug!(
                    job_id = %dispatch.id,
                    server_id = %dispatch.job.server_id,
                    "group idle"
                );
            }
            Advance::Stale => {
                tracing::warn!(
                    job_id = %dispatch.id,
                    server_id = %dispatch.job.server_id,
                    "job no longer owns its group slot, outcome dropped"
                );
            }
        }

        Ok(advance)
    }

    pub async fn job(&self, id: JobId) -> DqResult<Option<JobRecord>> {
        self.store.job(id).await
    }

    /// Whether the store answers.
    pub async fn is_store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
