use crate::helper::{
    encode_job, invalid_value_type, read_redis_value_as_int, read_redis_value_as_str,
};
use crate::{Admission, DeployJob, DqResult, JobId, Queue};
use redis::{FromRedisValue, RedisResult, Script, ScriptInvocation};

/// Appends a job to its group and claims the group's active slot if it is free.
#[derive(Clone)]
pub struct EnqueueAction {
    script: Script,
    queue: Queue,
}

impl EnqueueAction {
    pub fn new(queue: Queue) -> Self {
        Self {
            script: Script::new(crate::lua::ENQUEUE),
            queue,
        }
    }

    /// A busy group that already has `max_pending` waiting jobs rejects the enqueue.
    /// 0 disables the check.
    pub fn prepare_invoke(&self, job: &DeployJob, max_pending: usize) -> DqResult<ScriptInvocation> {
        let mut invoke = self.script.prepare_invoke();
        invoke
            .key(self.queue.job_seq_key.as_str())
            .key(self.queue.jobs_key.as_str())
            .key(self.queue.states_key.as_str())
            .key(self.queue.ready_key.as_str())
            .key(self.queue.group_pending_key(job.group()))
            .key(self.queue.group_active_key(job.group()));

        let job_data = encode_job(job)?;
        invoke.arg(&job_data).arg(max_pending);

        Ok(invoke)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueStatus {
    Admitted(Admission),
    Full { pending: i64 },
    Unknown(String),
}

impl TryFrom<&[redis::Value]> for EnqueueStatus {
    type Error = redis::RedisError;

    fn try_from(values: &[redis::Value]) -> Result<Self, Self::Error> {
        let mut iter = values.iter();
        let action =
            read_redis_value_as_str(iter.next(), "invalid enqueue status - invalid action")?;

        let status = match action.as_ref() {
            "active" => {
                let id =
                    read_redis_value_as_int(iter.next(), "invalid enqueue status - invalid id")?;
                EnqueueStatus::Admitted(Admission::Active(JobId(id)))
            }
            "queued" => {
                let id =
                    read_redis_value_as_int(iter.next(), "invalid enqueue status - invalid id")?;
                let position = read_redis_value_as_int(
                    iter.next(),
                    "invalid enqueue status - invalid position",
                )?;
                EnqueueStatus::Admitted(Admission::Queued {
                    id: JobId(id),
                    position,
                })
            }
            "full" => {
                let pending = read_redis_value_as_int(
                    iter.next(),
                    "invalid enqueue status - invalid pending",
                )?;
                EnqueueStatus::Full { pending }
            }
            _ => EnqueueStatus::Unknown(format!("{values:?}")),
        };

        Ok(status)
    }
}

impl FromRedisValue for EnqueueStatus {
    fn from_redis_value(v: &redis::Value) -> RedisResult<Self> {
        match v {
            redis::Value::Bulk(bulk) => EnqueueStatus::try_from(bulk.as_slice()),
            _ => Err(invalid_value_type(
                "invalid enqueue status - invalid value type",
                v,
            )),
        }
    }
}
