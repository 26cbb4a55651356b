use async_trait::async_trait;
use deployq::{
    Admission, Advance, DeployJob, Dispatch, DqError, DqResult, JobId, JobOutcome, JobRecord,
    JobState,
};
use deployq_async::{
    AsyncWorker, DeployError, Deployer, GroupScheduler, MemoryStore, QueueStore, StartupPolicy,
    WorkerConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_millis(200);

fn job(server_id: &str, application_id: &str) -> DeployJob {
    DeployJob::new(server_id).with_application_id(application_id)
}

fn scheduler() -> (Arc<MemoryStore>, GroupScheduler) {
    let store = Arc::new(MemoryStore::new());
    let scheduler = GroupScheduler::new(store.clone());
    (store, scheduler)
}

/// Records execution intervals and fails jobs whose application id starts with "fail".
#[derive(Clone, Default)]
struct RecordingDeployer {
    inner: Arc<Mutex<Recording>>,
    delay: Duration,
}

#[derive(Default)]
struct Recording {
    running: HashMap<String, usize>,
    max_running_per_group: usize,
    running_total: usize,
    max_running_total: usize,
    started: Vec<String>,
}

impl RecordingDeployer {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn started(&self) -> Vec<String> {
        self.inner.lock().unwrap().started.clone()
    }

    fn max_running_per_group(&self) -> usize {
        self.inner.lock().unwrap().max_running_per_group
    }

    fn max_running_total(&self) -> usize {
        self.inner.lock().unwrap().max_running_total
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, job: &DeployJob) -> Result<(), DeployError> {
        let name = job.application_id.clone().unwrap_or_default();
        {
            let mut rec = self.inner.lock().unwrap();
            let running = rec.running.entry(job.server_id.clone()).or_default();
            *running += 1;
            let running = *running;
            rec.max_running_per_group = rec.max_running_per_group.max(running);
            rec.running_total += 1;
            rec.max_running_total = rec.max_running_total.max(rec.running_total);
            rec.started.push(name.clone());
        }

        tokio::time::sleep(self.delay).await;

        {
            let mut rec = self.inner.lock().unwrap();
            *rec.running.entry(job.server_id.clone()).or_default() -= 1;
            rec.running_total -= 1;
        }

        if name.starts_with("fail") {
            Err(DeployError::Failed(format!("{name} exploded")))
        } else {
            Ok(())
        }
    }
}

async fn wait_terminal(scheduler: &GroupScheduler, ids: &[JobId]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = true;
        for id in ids {
            let record = scheduler.job(*id).await.unwrap().unwrap();
            if !record.state.is_terminal() {
                done = false;
            }
        }
        if done {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "jobs did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spawn_worker<D: Deployer>(
    scheduler: &GroupScheduler,
    deployer: D,
    config: WorkerConfig,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let worker = AsyncWorker::new(scheduler.clone(), deployer, config);
    let handle = tokio::spawn(worker.run(shutdown.clone()));
    (shutdown, handle)
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_timeout: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_job_of_idle_group_is_admitted() {
    let (_store, scheduler) = scheduler();

    let a1 = scheduler.enqueue(job("srv-a", "a1")).await.unwrap();
    let a2 = scheduler.enqueue(job("srv-a", "a2")).await.unwrap();
    let b1 = scheduler.enqueue(job("srv-b", "b1")).await.unwrap();

    assert!(matches!(a1, Admission::Active(_)));
    assert!(matches!(a2, Admission::Queued { position: 1, .. }));
    // a new group dispatches at once even though srv-a has a backlog
    assert!(matches!(b1, Admission::Active(_)));

    let record = scheduler.job(a2.id()).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Queued);
}

#[tokio::test]
async fn test_dispatch_order_matches_enqueue_order() {
    let (_store, scheduler) = scheduler();

    let mut enqueued = Vec::new();
    for n in 0..5 {
        let admission = scheduler
            .enqueue(job("srv-a", &format!("app-{n}")))
            .await
            .unwrap();
        enqueued.push(admission.id());
    }

    let mut dispatched = Vec::new();
    while let Some(dispatch) = scheduler.next_dispatch(WAIT).await.unwrap() {
        dispatched.push(dispatch.id);
        // only one job of the group is ever ready
        assert!(scheduler
            .next_dispatch(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
        scheduler
            .complete(&dispatch, &JobOutcome::Completed)
            .await
            .unwrap();
    }

    assert_eq!(dispatched, enqueued);
}

#[tokio::test]
async fn test_failed_job_still_advances_group() {
    let (_store, scheduler) = scheduler();

    let j1 = scheduler.enqueue(job("server-A", "fail-j1")).await.unwrap();
    let j2 = scheduler.enqueue(job("server-A", "j2")).await.unwrap();

    let deployer = RecordingDeployer::default();
    let (shutdown, handle) = spawn_worker(&scheduler, deployer.clone(), fast_config());

    wait_terminal(&scheduler, &[j1.id(), j2.id()]).await;
    shutdown.cancel();
    handle.await.unwrap();

    let r1 = scheduler.job(j1.id()).await.unwrap().unwrap();
    assert_eq!(r1.state, JobState::Failed);
    assert!(r1.error.unwrap().contains("fail-j1 exploded"));

    let r2 = scheduler.job(j2.id()).await.unwrap().unwrap();
    assert_eq!(r2.state, JobState::Completed);
    assert_eq!(deployer.started(), vec!["fail-j1", "j2"]);
}

#[tokio::test]
async fn test_same_group_never_overlaps_and_groups_run_in_parallel() {
    let (_store, scheduler) = scheduler();

    let mut ids = Vec::new();
    for n in 0..4 {
        for server in ["srv-a", "srv-b", "srv-c"] {
            let admission = scheduler
                .enqueue(job(server, &format!("{server}-{n}")))
                .await
                .unwrap();
            ids.push(admission.id());
        }
    }

    let deployer = RecordingDeployer::with_delay(Duration::from_millis(20));
    let (shutdown, handle) = spawn_worker(&scheduler, deployer.clone(), fast_config());

    wait_terminal(&scheduler, &ids).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(deployer.max_running_per_group(), 1);
    assert!(deployer.max_running_total() > 1);

    let started = deployer.started();
    for server in ["srv-a", "srv-b", "srv-c"] {
        let order: Vec<&String> = started.iter().filter(|s| s.starts_with(server)).collect();
        let expected: Vec<String> = (0..4).map(|n| format!("{server}-{n}")).collect();
        assert_eq!(order, expected.iter().collect::<Vec<_>>());
    }
}

/// Blocks jobs of one server until released.
#[derive(Clone, Default)]
struct GateDeployer {
    gate: Arc<tokio::sync::Notify>,
    blocked_server: String,
}

#[async_trait]
impl Deployer for GateDeployer {
    async fn deploy(&self, job: &DeployJob) -> Result<(), DeployError> {
        if job.server_id == self.blocked_server {
            self.gate.notified().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_hung_group_does_not_block_other_groups() {
    let (_store, scheduler) = scheduler();

    let stuck = scheduler.enqueue(job("srv-stuck", "s1")).await.unwrap();
    let behind = scheduler.enqueue(job("srv-stuck", "s2")).await.unwrap();
    let other = scheduler.enqueue(job("srv-free", "f1")).await.unwrap();

    let deployer = GateDeployer {
        blocked_server: "srv-stuck".to_string(),
        ..Default::default()
    };
    let (shutdown, handle) = spawn_worker(&scheduler, deployer.clone(), fast_config());

    wait_terminal(&scheduler, &[other.id()]).await;
    let stuck_record = scheduler.job(stuck.id()).await.unwrap().unwrap();
    assert_eq!(stuck_record.state, JobState::Active);
    let behind_record = scheduler.job(behind.id()).await.unwrap().unwrap();
    assert_eq!(behind_record.state, JobState::Queued);

    deployer.gate.notify_one();
    wait_terminal(&scheduler, &[stuck.id()]).await;
    deployer.gate.notify_one();
    wait_terminal(&scheduler, &[behind.id()]).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_deploy_timeout_fails_job_and_advances() {
    let (_store, scheduler) = scheduler();

    let slow = scheduler.enqueue(job("srv-a", "slow")).await.unwrap();
    let next = scheduler.enqueue(job("srv-a", "next")).await.unwrap();

    let deployer = GateDeployer {
        blocked_server: "srv-a".to_string(),
        ..Default::default()
    };
    let config = WorkerConfig {
        deploy_timeout: Some(Duration::from_millis(50)),
        ..fast_config()
    };
    let (shutdown, handle) = spawn_worker(&scheduler, deployer, config);

    wait_terminal(&scheduler, &[slow.id(), next.id()]).await;
    shutdown.cancel();
    handle.await.unwrap();

    let record = scheduler.job(slow.id()).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(record.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_flush_on_start_drops_previous_jobs() {
    let store = Arc::new(MemoryStore::new());
    let before = GroupScheduler::start(store.clone(), StartupPolicy::Flush)
        .await
        .unwrap();

    let a1 = before.enqueue(job("srv-a", "a1")).await.unwrap();
    before.enqueue(job("srv-a", "a2")).await.unwrap();

    // restart on the same store
    let after = GroupScheduler::start(store.clone(), StartupPolicy::Flush)
        .await
        .unwrap();

    assert!(after.job(a1.id()).await.unwrap().is_none());
    assert!(after.next_dispatch(Duration::from_millis(10)).await.unwrap().is_none());

    let fresh = after.enqueue(job("srv-a", "a3")).await.unwrap();
    assert!(matches!(fresh, Admission::Active(_)));
}

#[tokio::test]
async fn test_recover_on_start_redispatches_in_flight_job() {
    let store = Arc::new(MemoryStore::new());
    let before = GroupScheduler::new(store.clone());

    let a1 = before.enqueue(job("srv-a", "a1")).await.unwrap();
    let a2 = before.enqueue(job("srv-a", "a2")).await.unwrap();
    let taken = before.next_dispatch(WAIT).await.unwrap().unwrap();
    assert_eq!(taken.id, a1.id());
    // process dies before completing a1

    let after = GroupScheduler::start(store.clone(), StartupPolicy::Recover)
        .await
        .unwrap();

    let again = after.next_dispatch(WAIT).await.unwrap().unwrap();
    assert_eq!(again.id, a1.id());

    let advance = after.complete(&again, &JobOutcome::Completed).await.unwrap();
    assert_eq!(advance, Advance::Advanced(a2.id()));
}

#[tokio::test]
async fn test_backpressure_rejects_full_group() {
    let (_store, scheduler) = scheduler();
    let scheduler = scheduler.with_max_pending(2);

    scheduler.enqueue(job("srv-a", "a1")).await.unwrap();
    scheduler.enqueue(job("srv-a", "a2")).await.unwrap();
    scheduler.enqueue(job("srv-a", "a3")).await.unwrap();

    match scheduler.enqueue(job("srv-a", "a4")).await {
        Err(DqError::GroupFull { server_id, pending }) => {
            assert_eq!(server_id, "srv-a");
            assert_eq!(pending, 2);
        }
        other => panic!("expected GroupFull, got {other:?}"),
    }

    // other groups are unaffected
    assert!(scheduler.enqueue(job("srv-b", "b1")).await.is_ok());
}

#[tokio::test]
async fn test_second_complete_is_stale() {
    let (_store, scheduler) = scheduler();

    scheduler.enqueue(job("srv-a", "a1")).await.unwrap();
    let dispatch = scheduler.next_dispatch(WAIT).await.unwrap().unwrap();

    let first = scheduler
        .complete(&dispatch, &JobOutcome::Completed)
        .await
        .unwrap();
    assert_eq!(first, Advance::Idle);

    let second = scheduler
        .complete(&dispatch, &JobOutcome::Failed("late".into()))
        .await
        .unwrap();
    assert_eq!(second, Advance::Stale);

    let record = scheduler.job(dispatch.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_offline_store_reports_unhealthy() {
    let (store, scheduler) = scheduler();
    assert!(scheduler.is_store_healthy().await);

    store.set_offline(true);
    assert!(!scheduler.is_store_healthy().await);
    assert!(matches!(
        scheduler.enqueue(job("srv-a", "a1")).await,
        Err(DqError::StoreUnavailable)
    ));
    assert!(matches!(
        store.next_ready(Duration::from_millis(10)).await,
        Err(DqError::StoreUnavailable)
    ));
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let (_store, scheduler) = scheduler();
    let (shutdown, handle) = spawn_worker(&scheduler, RecordingDeployer::default(), fast_config());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

/// Panics on jobs whose application id is "boom", hangs on servers named "hung-*".
#[derive(Clone, Default)]
struct UnrulyDeployer;

#[async_trait]
impl Deployer for UnrulyDeployer {
    async fn deploy(&self, job: &DeployJob) -> Result<(), DeployError> {
        if job.application_id.as_deref() == Some("boom") {
            panic!("deployer blew up");
        }
        if job.server_id.starts_with("hung-") {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_panicking_deployer_fails_job_and_advances() {
    let (_store, scheduler) = scheduler();

    let j1 = scheduler.enqueue(job("server-A", "boom")).await.unwrap();
    let j2 = scheduler.enqueue(job("server-A", "j2")).await.unwrap();

    let (shutdown, handle) = spawn_worker(&scheduler, UnrulyDeployer, fast_config());
    wait_terminal(&scheduler, &[j1.id(), j2.id()]).await;
    shutdown.cancel();
    handle.await.unwrap();

    let r1 = scheduler.job(j1.id()).await.unwrap().unwrap();
    assert_eq!(r1.state, JobState::Failed);
    assert!(r1.error.unwrap().contains("deployer blew up"));

    let r2 = scheduler.job(j2.id()).await.unwrap().unwrap();
    assert_eq!(r2.state, JobState::Completed);
}

#[tokio::test]
async fn test_hung_groups_do_not_starve_others_by_default() {
    let (_store, scheduler) = scheduler();

    let mut hung = Vec::new();
    for n in 0..20 {
        let admission = scheduler
            .enqueue(job(&format!("hung-{n}"), "stuck"))
            .await
            .unwrap();
        hung.push(admission.id());
    }
    let free = scheduler.enqueue(job("srv-free", "f1")).await.unwrap();

    let config = WorkerConfig {
        shutdown_grace: Duration::from_millis(50),
        ..fast_config()
    };
    let (shutdown, handle) = spawn_worker(&scheduler, UnrulyDeployer, config);

    wait_terminal(&scheduler, &[free.id()]).await;
    for id in hung {
        let record = scheduler.job(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Active);
    }

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_capped_pool_with_timeout_outlasts_hung_groups() {
    let (_store, scheduler) = scheduler();

    let mut ids = Vec::new();
    for n in 0..3 {
        let admission = scheduler
            .enqueue(job(&format!("hung-{n}"), "stuck"))
            .await
            .unwrap();
        ids.push(admission.id());
    }
    let free = scheduler.enqueue(job("srv-free", "f1")).await.unwrap();

    let config = WorkerConfig {
        concurrency: 2,
        deploy_timeout: Some(Duration::from_millis(100)),
        ..fast_config()
    };
    let (shutdown, handle) = spawn_worker(&scheduler, UnrulyDeployer, config);

    wait_terminal(&scheduler, &[free.id()]).await;
    wait_terminal(&scheduler, &ids).await;
    shutdown.cancel();
    handle.await.unwrap();

    let record = scheduler.job(free.id()).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
}

/// Memory store that fails a number of payload reads and completions.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    payload_failures: AtomicUsize,
    complete_failures: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn enqueue(&self, job: &DeployJob, max_pending: usize) -> DqResult<Admission> {
        self.inner.enqueue(job, max_pending).await
    }

    async fn next_ready(&self, wait: Duration) -> DqResult<Option<JobId>> {
        self.inner.next_ready(wait).await
    }

    async fn payload(&self, id: JobId) -> DqResult<Option<DeployJob>> {
        if take_failure(&self.payload_failures) {
            return Err(DqError::StoreUnavailable);
        }
        self.inner.payload(id).await
    }

    async fn complete(&self, dispatch: &Dispatch, outcome: &JobOutcome) -> DqResult<Advance> {
        if take_failure(&self.complete_failures) {
            return Err(DqError::StoreUnavailable);
        }
        self.inner.complete(dispatch, outcome).await
    }

    async fn job(&self, id: JobId) -> DqResult<Option<JobRecord>> {
        self.inner.job(id).await
    }

    async fn flush(&self) -> DqResult<()> {
        self.inner.flush().await
    }

    async fn recover(&self) -> DqResult<usize> {
        self.inner.recover().await
    }

    async fn ping(&self) -> DqResult<()> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn test_job_taken_during_store_blip_is_dispatched_later() {
    let store = Arc::new(FlakyStore {
        payload_failures: AtomicUsize::new(1),
        ..Default::default()
    });
    let scheduler = GroupScheduler::new(store.clone());

    let j1 = scheduler.enqueue(job("srv-a", "a1")).await.unwrap();

    assert!(matches!(
        scheduler.next_dispatch(WAIT).await,
        Err(DqError::StoreUnavailable)
    ));

    let dispatch = scheduler.next_dispatch(WAIT).await.unwrap().unwrap();
    assert_eq!(dispatch.id, j1.id());
    assert_eq!(dispatch.job.server_id, "srv-a");
}

#[tokio::test]
async fn test_worker_keeps_reporting_until_the_store_is_back() {
    let store = Arc::new(FlakyStore {
        payload_failures: AtomicUsize::new(2),
        complete_failures: AtomicUsize::new(7),
        ..Default::default()
    });
    let scheduler = GroupScheduler::new(store.clone());

    let j1 = scheduler.enqueue(job("srv-a", "a1")).await.unwrap();
    let j2 = scheduler.enqueue(job("srv-a", "a2")).await.unwrap();

    let deployer = RecordingDeployer::default();
    let (shutdown, handle) = spawn_worker(&scheduler, deployer.clone(), fast_config());

    wait_terminal(&scheduler, &[j1.id(), j2.id()]).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(store.complete_failures.load(Ordering::SeqCst), 0);
    assert_eq!(deployer.started(), vec!["a1", "a2"]);
}
