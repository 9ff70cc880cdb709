use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a CircleCI list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Opaque cursor for the next page; `None` once the listing is exhausted.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A CircleCI pipeline: one CI run triggered by a VCS event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Opaque UUID
    pub id: String,
    /// Project-scoped, monotonically increasing pipeline number
    pub number: u64,
    #[serde(default)]
    pub project_slug: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vcs: Vcs,
}

impl Pipeline {
    /// Branch name, falling back to the tag, or `???` when neither is known.
    pub fn ref_name(&self) -> &str {
        self.vcs
            .branch
            .as_deref()
            .or(self.vcs.tag.as_deref())
            .unwrap_or("???")
    }

    pub fn commit_subject(&self) -> &str {
        self.vcs
            .commit
            .as_ref()
            .and_then(|c| c.subject.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vcs {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub origin_repository_url: Option<String>,
    #[serde(default)]
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A named execution of a job DAG within a pipeline.
///
/// Names are not unique: re-running a workflow produces another instance
/// with the same name under the same pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub pipeline_number: Option<u64>,
    #[serde(default)]
    pub project_slug: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Absent while the workflow is still running
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

/// A single executable unit within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Status,
    /// Only assigned once the job starts; needed for deep links.
    #[serde(default)]
    pub job_number: Option<u64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Ids of the jobs that must complete before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Job {
    /// Wall-clock run time, when both endpoints are known.
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => Some((stop - start).num_seconds()),
            _ => None,
        }
    }
}

/// Workflow and job status as reported by CircleCI.
///
/// Unrecognized values are preserved verbatim in [`Status::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Success,
    Failed,
    Canceled,
    Running,
    OnHold,
    Blocked,
    Queued,
    Unauthorized,
    NotRunning,
    Unknown(String),
}

impl Status {
    /// Terminal statuses never transition again, so payloads made only of
    /// terminal statuses are safe to cache across runs.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Running => "running",
            Self::OnHold => "on_hold",
            Self::Blocked => "blocked",
            Self::Queued => "queued",
            Self::Unauthorized => "unauthorized",
            Self::NotRunning => "not_running",
            Self::Unknown(raw) => raw,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::Unknown("unknown".to_string())
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            "running" => Self::Running,
            "on_hold" => Self::OnHold,
            "blocked" => Self::Blocked,
            "queued" => Self::Queued,
            "unauthorized" => Self::Unauthorized,
            "not_running" => Self::NotRunning,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
