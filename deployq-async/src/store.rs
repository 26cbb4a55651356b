use async_trait::async_trait;
use deployq::{Admission, Advance, DeployJob, Dispatch, DqResult, JobId, JobOutcome, JobRecord};
use std::time::Duration;

/// Durable home of queued jobs, group membership and active slots.
///
/// Implementations must make the active-slot check-and-set of `enqueue` and the
/// release-or-promote of `complete` atomic with respect to each other, so two
/// jobs of one group can never both be active.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists `job` at the tail of its group. Admits it when the group is idle.
    ///
    /// With `max_pending > 0` a busy group that already has that many waiting
    /// jobs rejects the enqueue with `DqError::GroupFull`.
    async fn enqueue(&self, job: &DeployJob, max_pending: usize) -> DqResult<Admission>;

    /// Takes the next admitted job id, waiting up to `wait`. The id stays marked
    /// as processing until [`QueueStore::complete`] is called for it.
    async fn next_ready(&self, wait: Duration) -> DqResult<Option<JobId>>;

    /// The stored payload of a job, `None` when the job is unknown.
    async fn payload(&self, id: JobId) -> DqResult<Option<DeployJob>>;

    async fn complete(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> DqResult<Advance>;

    async fn job(&self, id: JobId) -> DqResult<Option<JobRecord>>;

    /// Drops every job, group and slot.
    async fn flush(&self) -> DqResult<()>;

    /// Re-dispatches jobs that were taken by a worker but never completed.
    async fn recover(&self) -> DqResult<usize>;

    async fn ping(&self) -> DqResult<()>;
}
