use crate::store::QueueStore;
use async_trait::async_trait;
use deployq::{
    decode_job, Admission, Advance, CompleteAction, CompleteStatus, DeployJob, DequeueAction,
    Dispatch, DqError, DqResult, EnqueueAction, EnqueueStatus, FetchAction, FlushAction, JobId,
    JobOutcome, JobRecord, Queue, RecoverAction,
};
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::time::Duration;

pub struct RedisStore {
    connection_manager: ConnectionManager,
    // blocking pops get their own connection so they never stall enqueue/complete
    dispatch_connection: ConnectionManager,
    enqueue_action: EnqueueAction,
    dequeue_action: DequeueAction,
    fetch_action: FetchAction,
    complete_action: CompleteAction,
    recover_action: RecoverAction,
    flush_action: FlushAction,
}

impl RedisStore {
    pub async fn new(redis_url: &str, queue: Queue) -> DqResult<Self> {
        let client = Client::open(redis_url).map_err(DqError::CreateRedisClient)?;
        let connection_manager = client
            .get_tokio_connection_manager()
            .await
            .map_err(DqError::GetRedisConn)?;
        let dispatch_connection = client
            .get_tokio_connection_manager()
            .await
            .map_err(DqError::GetRedisConn)?;

        Ok(Self {
            connection_manager,
            dispatch_connection,
            enqueue_action: EnqueueAction::new(queue.clone()),
            dequeue_action: DequeueAction::new(queue.clone()),
            fetch_action: FetchAction::new(queue.clone()),
            complete_action: CompleteAction::new(queue.clone()),
            recover_action: RecoverAction::new(queue),
            flush_action: FlushAction::new(),
        })
    }

    async fn fetch(&self, id: JobId) -> DqResult<Option<JobRecord>> {
        let mut conn = self.connection_manager.clone();
        let reply: (Option<String>, Option<String>, Option<String>) = self
            .fetch_action
            .prepare_invoke(id)
            .query_async(&mut conn)
            .await
            .map_err(DqError::Lookup)?;

        FetchAction::into_record(id, reply)
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(&self, job: &DeployJob, max_pending: usize) -> DqResult<Admission> {
        let mut conn = self.connection_manager.clone();
        let enqueue_status: EnqueueStatus = self
            .enqueue_action
            .prepare_invoke(job, max_pending)?
            .invoke_async(&mut conn)
            .await
            .map_err(DqError::Enqueue)?;

        match enqueue_status {
            EnqueueStatus::Admitted(admission) => Ok(admission),
            EnqueueStatus::Full { pending } => Err(DqError::GroupFull {
                server_id: job.server_id.clone(),
                pending,
            }),
            EnqueueStatus::Unknown(err) => Err(DqError::Enqueue(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "enqueue error",
                err,
            )))),
        }
    }

    async fn next_ready(&self, wait: Duration) -> DqResult<Option<JobId>> {
        let mut conn = self.dispatch_connection.clone();
        let id: Option<i64> = self
            .dequeue_action
            .prepare_invoke(wait)
            .query_async(&mut conn)
            .await
            .map_err(DqError::Dequeue)?;

        Ok(id.map(JobId))
    }

    async fn payload(&self, id: JobId) -> DqResult<Option<DeployJob>> {
        let mut conn = self.connection_manager.clone();
        let payload: Option<String> = self
            .fetch_action
            .prepare_payload(id)
            .query_async(&mut conn)
            .await
            .map_err(DqError::Lookup)?;

        payload.as_deref().map(decode_job).transpose()
    }

    async fn complete(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> DqResult<Advance> {
        let mut conn = self.connection_manager.clone();
        let complete_status: CompleteStatus = self
            .complete_action
            .prepare_invoke(dispatch, outcome)
            .invoke_async(&mut conn)
            .await
            .map_err(DqError::Complete)?;

        match complete_status {
            CompleteStatus::Done(advance) => Ok(advance),
            CompleteStatus::Unknown(err) => Err(DqError::Complete(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "complete error",
                err,
            )))),
        }
    }

    async fn job(&self, id: JobId) -> DqResult<Option<JobRecord>> {
        self.fetch(id).await
    }

    async fn flush(&self) -> DqResult<()> {
        let mut conn = self.connection_manager.clone();
        let r: RedisResult<()> = self
            .flush_action
            .prepare_invoke()
            .query_async(&mut conn)
            .await;
        r.map_err(DqError::Flush)
    }

    async fn recover(&self) -> DqResult<usize> {
        let mut conn = self.connection_manager.clone();
        let moved: i64 = self
            .recover_action
            .prepare_invoke()
            .invoke_async(&mut conn)
            .await
            .map_err(DqError::Recover)?;
        Ok(moved.max(0) as usize)
    }

    async fn ping(&self) -> DqResult<()> {
        let mut conn = self.connection_manager.clone();
        let r: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        r.map(|_| ()).map_err(DqError::Ping)
    }
}
