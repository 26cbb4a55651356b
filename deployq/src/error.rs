use thiserror::Error;

pub type DqResult<T> = Result<T, DqError>;

#[derive(Error, Debug)]
pub enum DqError {
    #[error("CreateRedisClient: {0}")]
    CreateRedisClient(redis::RedisError),
    #[error("GetRedisConn: {0}")]
    GetRedisConn(redis::RedisError),
    #[error("Enqueue: {0}")]
    Enqueue(redis::RedisError),
    #[error("Dequeue: {0}")]
    Dequeue(redis::RedisError),
    #[error("Complete: {0}")]
    Complete(redis::RedisError),
    #[error("Lookup: {0}")]
    Lookup(redis::RedisError),
    #[error("Flush: {0}")]
    Flush(redis::RedisError),
    #[error("Recover: {0}")]
    Recover(redis::RedisError),
    #[error("Ping: {0}")]
    Ping(redis::RedisError),
    #[error("SerializeJob: {0}")]
    SerializeJob(serde_json::Error),
    #[error("InvalidJobData: {0}")]
    InvalidJobData(String),
    #[error("GroupFull: {server_id} already has {pending} pending jobs")]
    GroupFull { server_id: String, pending: i64 },
    #[error("StoreUnavailable")]
    StoreUnavailable,
}
