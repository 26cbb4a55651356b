use async_trait::async_trait;
use deployq::{encode_job, DeployJob, DqError};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How much of the command's stderr is kept as the failure reason.
const STDERR_TAIL: usize = 2048;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("deploy failed: {0}")]
    Failed(String),
    #[error("deploy timed out after {0} secs")]
    TimedOut(u64),
    #[error("deploy command could not run: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("deploy payload: {0}")]
    Payload(#[from] DqError),
}

/// The collaborator that actually deploys one admitted job.
#[async_trait]
pub trait Deployer: Send + Sync + 'static {
    async fn deploy(&self, job: &DeployJob) -> Result<(), DeployError>;
}

/// Runs a shell command per job.
///
/// The job is written to the command's stdin as JSON, and the main fields are
/// exported as `DEPLOY_*` environment variables. A non-zero exit is a failure.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    command: String,
}

impl CommandDeployer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, job: &DeployJob) -> Result<(), DeployError> {
        let payload = encode_job(job)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("DEPLOY_SERVER_ID", &job.server_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(application_id) = &job.application_id {
            cmd.env("DEPLOY_APPLICATION_ID", application_id);
        }
        if let Some(compose_id) = &job.compose_id {
            cmd.env("DEPLOY_COMPOSE_ID", compose_id);
        }
        if let Some(deployment_id) = &job.deployment_id {
            cmd.env("DEPLOY_ID", deployment_id);
        }
        if let Some(kind) = job.kind {
            cmd.env(
                "DEPLOY_TYPE",
                match kind {
                    deployq::DeployKind::Deploy => "deploy",
                    deployq::DeployKind::Redeploy => "redeploy",
                },
            );
        }

        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // a command that ignores stdin may close it early
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!("deploy command closed stdin: {err}");
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail = match stderr.char_indices().rev().nth(STDERR_TAIL) {
            Some((idx, _)) => &stderr[idx..],
            None => stderr,
        };

        Err(DeployError::Failed(if tail.is_empty() {
            output.status.to_string()
        } else {
            format!("{}: {tail}", output.status)
        }))
    }
}
