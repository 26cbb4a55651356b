use crate::helper::decode_job;
use crate::{DqError, DqResult, JobId, JobRecord, JobState, Queue};
use std::time::Duration;

/// Moves the oldest admitted job id from `ready` to `processing`, blocking up to `wait`.
#[derive(Clone)]
pub struct DequeueAction {
    queue: Queue,
}

impl DequeueAction {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    pub fn prepare_invoke(&self, wait: Duration) -> redis::Cmd {
        // 0 would block forever
        let wait_secs = wait.as_secs_f64().max(1.0);

        tracing::trace!("dequeue - wait {} secs", wait_secs);

        redis::Cmd::brpoplpush(
            self.queue.ready_key.as_str(),
            self.queue.processing_key.as_str(),
            wait_secs,
        )
    }
}

/// Reads the stored payload and lifecycle state of a job.
#[derive(Clone)]
pub struct FetchAction {
    queue: Queue,
}

impl FetchAction {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Payload only, for handing a dispatched job to the worker.
    pub fn prepare_payload(&self, id: JobId) -> redis::Cmd {
        redis::Cmd::hget(self.queue.jobs_key.as_str(), id.0)
    }

    pub fn prepare_invoke(&self, id: JobId) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.hget(self.queue.jobs_key.as_str(), id.0)
            .hget(self.queue.states_key.as_str(), id.0)
            .hget(self.queue.errors_key.as_str(), id.0);
        pipe
    }

    /// Builds a record from the pipeline reply. `None` when the job is unknown.
    pub fn into_record(
        id: JobId,
        (payload, state, error): (Option<String>, Option<String>, Option<String>),
    ) -> DqResult<Option<JobRecord>> {
        let payload = match payload {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let job = decode_job(&payload)?;
        let state = state
            .as_deref()
            .unwrap_or("queued")
            .parse::<JobState>()
            .map_err(DqError::InvalidJobData)?;

        Ok(Some(JobRecord {
            id,
            job,
            state,
            error,
        }))
    }
}
