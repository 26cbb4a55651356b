use crate::{redis_keys, ArcString};
use std::sync::Arc;

const DEFAULT_PREFIX: &str = "deployq";
const DEFAULT_QUEUE: &str = "deployments";

#[derive(Clone, Debug)]
pub struct Queue {
    pub prefix: ArcString,
    pub queue_name: ArcString,
    pub(crate) job_seq_key: ArcString,
    pub(crate) jobs_key: ArcString,
    pub(crate) states_key: ArcString,
    pub(crate) errors_key: ArcString,
    pub(crate) ready_key: ArcString,
    pub(crate) processing_key: ArcString,
}

impl Default for Queue {
    fn default() -> Self {
        Queue::new(DEFAULT_PREFIX, DEFAULT_QUEUE)
    }
}

impl Queue {
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        let prefix: ArcString = Arc::new(prefix.into());
        let queue_name: ArcString = Arc::new(queue_name.into());

        Self {
            job_seq_key: redis_keys::job_seq_key(&prefix, &queue_name),
            jobs_key: redis_keys::jobs_key(&prefix, &queue_name),
            states_key: redis_keys::states_key(&prefix, &queue_name),
            errors_key: redis_keys::errors_key(&prefix, &queue_name),
            ready_key: redis_keys::ready_key(&prefix, &queue_name),
            processing_key: redis_keys::processing_key(&prefix, &queue_name),
            prefix,
            queue_name,
        }
    }

    /// Uses the default queue name under a custom key prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Queue::new(prefix, DEFAULT_QUEUE)
    }

    pub(crate) fn group_pending_key(&self, server_id: &str) -> String {
        redis_keys::group_pending_key(&self.prefix, &self.queue_name, server_id)
    }

    pub(crate) fn group_active_key(&self, server_id: &str) -> String {
        redis_keys::group_active_key(&self.prefix, &self.queue_name, server_id)
    }
}
