use crate::helper::{invalid_value_type, read_redis_value_as_int, read_redis_value_as_str};
use crate::{Advance, Dispatch, JobId, JobOutcome, Queue};
use redis::{FromRedisValue, RedisResult, Script, ScriptInvocation};

/// Records a terminal outcome and hands the group's active slot to the next pending job.
#[derive(Clone)]
pub struct CompleteAction {
    script: Script,
    queue: Queue,
}

impl CompleteAction {
    pub fn new(queue: Queue) -> Self {
        Self {
            script: Script::new(crate::lua::COMPLETE),
            queue,
        }
    }

    pub fn prepare_invoke(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> ScriptInvocation {
        let group = dispatch.job.group();

        let mut invoke = self.script.prepare_invoke();
        invoke
            .key(self.queue.states_key.as_str())
            .key(self.queue.errors_key.as_str())
            .key(self.queue.ready_key.as_str())
            .key(self.queue.processing_key.as_str())
            .key(self.queue.group_pending_key(group))
            .key(self.queue.group_active_key(group));

        invoke
            .arg(dispatch.id.0)
            .arg(outcome.state().as_str())
            .arg(outcome.error().unwrap_or_default());

        invoke
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CompleteStatus {
    Done(Advance),
    Unknown(String),
}

impl TryFrom<&[redis::Value]> for CompleteStatus {
    type Error = redis::RedisError;

    fn try_from(values: &[redis::Value]) -> Result<Self, Self::Error> {
        let mut iter = values.iter();
        let action =
            read_redis_value_as_str(iter.next(), "invalid complete status - invalid action")?;

        let status = match action.as_ref() {
            "advanced" => {
                let next = read_redis_value_as_int(
                    iter.next(),
                    "invalid complete status - advanced - invalid id",
                )?;
                CompleteStatus::Done(Advance::Advanced(JobId(next)))
            }
            "idle" => CompleteStatus::Done(Advance::Idle),
            "stale" => CompleteStatus::Done(Advance::Stale),
            _ => CompleteStatus::Unknown(format!("{values:?}")),
        };

        Ok(status)
    }
}

impl FromRedisValue for CompleteStatus {
    fn from_redis_value(v: &redis::Value) -> RedisResult<Self> {
        match v {
            redis::Value::Bulk(bulk) => CompleteStatus::try_from(bulk.as_slice()),
            _ => Err(invalid_value_type(
                "invalid complete status - invalid value type",
                v,
            )),
        }
    }
}
