use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Store-assigned job identifier, monotonically increasing per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    Application,
    Compose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployKind {
    Deploy,
    Redeploy,
}

/// A validated deploy request.
///
/// `server_id` is the only required field and doubles as the group key: jobs
/// sharing it are executed one at a time, in enqueue order. Every other field
/// is passed through to the deployer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeployJob {
    #[validate(length(min = 1, message = "serverId must not be empty"))]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "applicationId must not be empty"))]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "composeId must not be empty"))]
    pub compose_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "deploymentId must not be empty"))]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_type: Option<ApplicationType>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeployKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<bool>,
}

impl DeployJob {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            application_id: None,
            compose_id: None,
            deployment_id: None,
            application_type: None,
            kind: None,
            title_log: None,
            description_log: None,
            server: None,
        }
    }

    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// The serialization group this job belongs to.
    pub fn group(&self) -> &str {
        &self.server_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// What the deployer reported for one admitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed => None,
            JobOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Result of handing a job to its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The group was idle, the job took the active slot and was dispatched.
    Active(JobId),
    /// Another job of the group is active; this one waits at `position` (1-based).
    Queued { id: JobId, position: i64 },
}

impl Admission {
    pub fn id(&self) -> JobId {
        match self {
            Admission::Active(id) => *id,
            Admission::Queued { id, .. } => *id,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Admission::Active(_) => JobState::Active,
            Admission::Queued { .. } => JobState::Queued,
        }
    }
}

/// Result of completing the active job of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The next pending job was promoted and dispatched.
    Advanced(JobId),
    /// Nothing was pending, the active slot was released.
    Idle,
    /// The job no longer owns its group's active slot; nothing was changed.
    Stale,
}

/// An admitted job handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub id: JobId,
    pub job: DeployJob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub job: DeployJob,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
