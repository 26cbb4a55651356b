use crate::ArcString;

// job-seq       - int: last assigned job id
#[inline]
pub(crate) fn job_seq_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:job-seq").into()
}

// jobs          - hash: {id payload} ; Job content
#[inline]
pub(crate) fn jobs_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:jobs").into()
}

// states        - hash: {id state} ; queued / active / completed / failed
#[inline]
pub(crate) fn states_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:states").into()
}

// errors        - hash: {id reason} ; Failure reason of failed jobs
#[inline]
pub(crate) fn errors_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:errors").into()
}

// ready         - list: admitted ids waiting for a worker (push to left, pop from right)
#[inline]
pub(crate) fn ready_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:ready").into()
}

// processing    - list: ids taken by a worker and not completed yet
#[inline]
pub(crate) fn processing_key(prefix: &str, queue_name: &str) -> ArcString {
    format!("{prefix}:{queue_name}:processing").into()
}

// group pending - list: queued ids of one server (push to right, pop from left)
#[inline]
pub(crate) fn group_pending_key(prefix: &str, queue_name: &str, server_id: &str) -> String {
    format!("{prefix}:{queue_name}:group:{server_id}:pending")
}

// group active  - string: id owning the server's active slot
#[inline]
pub(crate) fn group_active_key(prefix: &str, queue_name: &str, server_id: &str) -> String {
    format!("{prefix}:{queue_name}:group:{server_id}:active")
}
