use crate::deployer::{DeployError, Deployer};
use crate::scheduler::GroupScheduler;
use deployq::{DeployJob, Dispatch, JobOutcome};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deploys running at the same time. `0` runs every admitted job at once,
    /// so a hung deploy only ever holds up its own group.
    pub concurrency: usize,
    /// How long one poll waits for an admitted job. Shutdown is noticed
    /// between polls.
    pub poll_timeout: Duration,
    /// Upper bound for one deploy. `None` waits for the deployer forever.
    pub deploy_timeout: Option<Duration>,
    /// First delay after a store error, doubled per retry up to 30s.
    pub retry_backoff: Duration,
    /// How long shutdown waits for in-flight deploys.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            deploy_timeout: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

pub struct AsyncWorker<D> {
    scheduler: GroupScheduler,
    deployer: Arc<D>,
    config: WorkerConfig,
}

impl<D: Deployer> AsyncWorker<D> {
    pub fn new(scheduler: GroupScheduler, deployer: D, config: WorkerConfig) -> Self {
        Self {
            scheduler,
            deployer: Arc::new(deployer),
            config,
        }
    }

    /// Pulls admitted jobs until `shutdown` is cancelled, then waits for in-flight deploys.
    pub async fn run(self, shutdown: CancellationToken) {
        let slots = match self.config.concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let tasks = TaskTracker::new();

        tracing::info!(
            concurrency = self.config.concurrency,
            poll_timeout_secs = self.config.poll_timeout.as_secs(),
            deploy_timeout_secs = self.config.deploy_timeout.map(|t| t.as_secs()),
            "worker started"
        );

        let mut backoff = self.config.retry_backoff;
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let permit = match &slots {
                Some(slots) => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = slots.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            // not raced against shutdown: a taken id must reach a deploy
            match self.scheduler.next_dispatch(self.config.poll_timeout).await {
                Ok(Some(dispatch)) => {
                    backoff = self.config.retry_backoff;
                    let scheduler = self.scheduler.clone();
                    let deployer = Arc::clone(&self.deployer);
                    let config = self.config.clone();
                    let shutdown = shutdown.clone();

                    tasks.spawn(async move {
                        let _permit = permit;
                        process(&scheduler, deployer, dispatch, &config, &shutdown).await;
                    });
                }
                Ok(None) => {
                    tracing::trace!("no admitted jobs");
                }
                Err(err) => {
                    tracing::error!("dequeue ERROR: {err}");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "worker stopping, waiting for in-flight deploys");
        tasks.close();
        if tokio::time::timeout(self.config.shutdown_grace, tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!("in-flight deploys still running at shutdown");
        }
        tracing::info!("worker stopped");
    }
}

/// Deploys one admitted job and reports its outcome back to the scheduler.
///
/// Reporting is retried until it lands or shutdown is requested, since the
/// group stays blocked until its active job completes.
async fn process<D: Deployer>(
    scheduler: &GroupScheduler,
    deployer: Arc<D>,
    dispatch: Dispatch,
    config: &WorkerConfig,
    shutdown: &CancellationToken,
) {
    let started = Instant::now();
    tracing::info!(
        job_id = %dispatch.id,
        server_id = %dispatch.job.server_id,
        application_id = dispatch.job.application_id.as_deref(),
        compose_id = dispatch.job.compose_id.as_deref(),
        "deploying job"
    );

    let outcome = match deploy(deployer, dispatch.job.clone(), config.deploy_timeout).await {
        Ok(()) => {
            tracing::info!(
                job_id = %dispatch.id,
                server_id = %dispatch.job.server_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "deployment completed"
            );
            JobOutcome::Completed
        }
        Err(err) => {
            tracing::error!(
                job_id = %dispatch.id,
                server_id = %dispatch.job.server_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "deployment failed: {err}"
            );
            JobOutcome::Failed(err.to_string())
        }
    };

    let mut backoff = config.retry_backoff;
    let mut attempt: u32 = 1;
    loop {
        match scheduler.complete(&dispatch, &outcome).await {
            Ok(_) => return,
            Err(err) => {
                tracing::error!(
                    job_id = %dispatch.id,
                    server_id = %dispatch.job.server_id,
                    attempt,
                    "error when complete_job: {err}"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::warn!(
                    job_id = %dispatch.id,
                    server_id = %dispatch.job.server_id,
                    "shutting down before the outcome was recorded"
                );
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
        attempt += 1;
    }
}

/// Runs the deployer on its own task so a panic or a timeout ends as a failure.
async fn deploy<D: Deployer>(
    deployer: Arc<D>,
    job: DeployJob,
    deploy_timeout: Option<Duration>,
) -> Result<(), DeployError> {
    let mut task = tokio::spawn(async move { deployer.deploy(&job).await });

    let joined = match deploy_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(DeployError::TimedOut(limit.as_secs()));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(DeployError::Failed(format!(
            "deployer panicked: {}",
            panic_message(err.into_panic())
        ))),
        Err(err) => Err(DeployError::Failed(err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
