use crate::store::QueueStore;
use async_trait::async_trait;
use deployq::{
    Admission, Advance, DeployJob, Dispatch, DqError, DqResult, JobId, JobOutcome, JobRecord,
    JobState,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// In-process store with the same admission rules as the redis scripts.
///
/// Every operation runs under one lock, which gives the check-and-set on a
/// group's active slot the atomicity the scripts get from redis.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    ready_notify: Notify,
    offline: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    seq: i64,
    jobs: HashMap<JobId, JobRecord>,
    groups: HashMap<String, Group>,
    ready: VecDeque<JobId>,
    processing: Vec<JobId>,
}

#[derive(Default)]
struct Group {
    active: Option<JobId>,
    pending: VecDeque<JobId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the connection: every operation fails until set back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> DqResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DqError::StoreUnavailable)
        } else {
            Ok(())
        }
    }

    fn push_ready(&self, state: &mut MemoryState, id: JobId) {
        state.ready.push_back(id);
        self.ready_notify.notify_one();
    }
}

impl MemoryState {
    fn set_state(&mut self, id: JobId, job_state: JobState, error: Option<&str>) {
        if let Some(record) = self.jobs.get_mut(&id) {
            record.state = job_state;
            if let Some(error) = error {
                record.error = Some(error.to_string());
            }
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: &DeployJob, max_pending: usize) -> DqResult<Admission> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        let group = state.groups.entry(job.server_id.clone()).or_default();
        if max_pending > 0 && group.active.is_some() && group.pending.len() >= max_pending {
            return Err(DqError::GroupFull {
                server_id: job.server_id.clone(),
                pending: group.pending.len() as i64,
            });
        }

        state.seq += 1;
        let id = JobId(state.seq);

        let group = state.groups.entry(job.server_id.clone()).or_default();
        let admission = if group.active.is_none() {
            group.active = Some(id);
            Admission::Active(id)
        } else {
            group.pending.push_back(id);
            Admission::Queued {
                id,
                position: group.pending.len() as i64,
            }
        };

        state.jobs.insert(
            id,
            JobRecord {
                id,
                job: job.clone(),
                state: admission.state(),
                error: None,
            },
        );
        if let Admission::Active(id) = admission {
            self.push_ready(&mut state, id);
        }

        Ok(admission)
    }

    async fn next_ready(&self, wait: Duration) -> DqResult<Option<JobId>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            self.check_online()?;
            let notified = self.ready_notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.ready.pop_front() {
                    state.processing.push(id);
                    return Ok(Some(id));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn payload(&self, id: JobId) -> DqResult<Option<DeployJob>> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).map(|record| record.job.clone()))
    }

    async fn complete(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> DqResult<Advance> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        state.processing.retain(|id| *id != dispatch.id);

        let group = match state.groups.get_mut(dispatch.job.group()) {
            Some(group) if group.active == Some(dispatch.id) => group,
            _ => return Ok(Advance::Stale),
        };

        let next = group.pending.pop_front();
        group.active = next;
        if next.is_none() {
            state.groups.remove(dispatch.job.group());
        }

        state.set_state(dispatch.id, outcome.state(), outcome.error());

        match next {
            Some(next) => {
                state.set_state(next, JobState::Active, None);
                self.push_ready(&mut state, next);
                Ok(Advance::Advanced(next))
            }
            None => Ok(Advance::Idle),
        }
    }

    async fn job(&self, id: JobId) -> DqResult<Option<JobRecord>> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn flush(&self) -> DqResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        *state = MemoryState::default();
        Ok(())
    }

    async fn recover(&self) -> DqResult<usize> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let stranded: Vec<JobId> = state.processing.drain(..).collect();
        for id in &stranded {
            self.push_ready(&mut state, *id);
        }
        Ok(stranded.len())
    }

    async fn ping(&self) -> DqResult<()> {
        self.check_online()
    }
}
