mod complete;
mod dequeue;
mod enqueue;
pub(crate) mod error;
mod helper;
mod job;
pub(crate) mod lua;
pub(crate) mod queue;
mod recover;
mod redis_keys;
pub mod schema;

pub use {
    complete::{CompleteAction, CompleteStatus},
    dequeue::{DequeueAction, FetchAction},
    enqueue::{EnqueueAction, EnqueueStatus},
    error::{DqError, DqResult},
    helper::{decode_job, encode_job},
    job::{
        Admission, Advance, ApplicationType, DeployJob, DeployKind, Dispatch, JobId, JobOutcome,
        JobRecord, JobState,
    },
    queue::Queue,
    recover::{FlushAction, RecoverAction},
    schema::{FieldViolation, ValidationError},
};

pub(crate) type ArcString = std::sync::Arc<String>;
