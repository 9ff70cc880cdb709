use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::providers::circleci::aggregate::{CiData, PipelineEntry};
use crate::providers::circleci::client::RequestCounts;
use crate::providers::circleci::links::{commit_url, job_url, workflow_url};
use crate::providers::circleci::types::{Job, Status};

/// Pipelines × workflows/jobs status grid, ready for any renderer.
#[derive(Debug, Serialize)]
pub struct StatusMatrix {
    pub project: String,
    pub description: String,
    pub generated_at: DateTime<Utc>,
    pub requests: RequestCounts,
    pub columns: Vec<WorkflowColumn>,
    pub rows: Vec<PipelineRow>,
}

/// A workflow name and the job names seen under it, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowColumn {
    pub name: String,
    pub jobs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineRow {
    pub number: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub ref_name: String,
    pub subject: String,
    pub commit_url: Option<String>,
    /// One cell per column; `None` when the pipeline never ran that workflow.
    pub workflows: Vec<Option<WorkflowCell>>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowCell {
    pub id: String,
    pub status: Status,
    /// Created → stopped, or → now while still running.
    pub duration: Option<String>,
    pub running: bool,
    pub url: String,
    /// One cell per job name in the column.
    pub jobs: Vec<Option<JobCell>>,
}

#[derive(Debug, Serialize)]
pub struct JobCell {
    pub status: Status,
    pub duration: Option<String>,
    pub url: Option<String>,
}

/// Settings shared by every matrix built in one run.
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    pub app_url: String,
    /// Workflow columns always placed at the right end, in this order.
    pub trailing_workflows: Vec<String>,
}

/// `h:mm:ss` when at least an hour, `m:ss` otherwise.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

impl StatusMatrix {
    pub fn build(
        data: &CiData,
        project: &str,
        description: &str,
        options: &MatrixOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let columns = columns(data, &options.trailing_workflows);
        let rows = data
            .newest_first()
            .map(|entry| pipeline_row(entry, &columns, &options.app_url, now))
            .collect();

        Self {
            project: project.to_string(),
            description: description.to_string(),
            generated_at: data.generated_at.unwrap_or(now),
            requests: data.requests,
            columns,
            rows,
        }
    }

    /// "generated at … GMT (U/T uncached requests)"
    pub fn info_line(&self) -> String {
        format!(
            "generated at {} GMT ({}/{} uncached requests)",
            self.generated_at.format("%Y-%m-%d %H:%M:%S"),
            self.requests.uncached_requests,
            self.requests.total_requests
        )
    }
}

fn columns(data: &CiData, trailing: &[String]) -> Vec<WorkflowColumn> {
    let mut structure: IndexMap<&str, IndexMap<&str, ()>> = IndexMap::new();
    for entry in data.newest_first() {
        for workflow in &entry.workflows {
            let jobs = structure.entry(workflow.workflow.name.as_str()).or_default();
            for job in &workflow.jobs {
                jobs.insert(job.name.as_str(), ());
            }
        }
    }

    // Trailing workflows go last so they don't hop around between runs
    for name in trailing {
        if let Some(jobs) = structure.shift_remove(name.as_str()) {
            structure.insert(name.as_str(), jobs);
        }
    }

    structure
        .into_iter()
        .map(|(name, jobs)| WorkflowColumn {
            name: name.to_string(),
            jobs: jobs.into_keys().map(ToString::to_string).collect(),
        })
        .collect()
}

fn pipeline_row(
    entry: &PipelineEntry,
    columns: &[WorkflowColumn],
    app_url: &str,
    now: DateTime<Utc>,
) -> PipelineRow {
    let pipeline = &entry.pipeline;
    let workflows = columns
        .iter()
        .map(|column| {
            let latest = entry.latest(&column.name)?;
            let workflow = &latest.workflow;
            let url = workflow_url(app_url, &pipeline.project_slug, pipeline.number, &workflow.id);

            let running = workflow.stopped_at.is_none();
            let duration = workflow.created_at.map(|created| {
                let end = workflow.stopped_at.unwrap_or(now);
                format_duration((end - created).num_seconds())
            });

            let jobs = column
                .jobs
                .iter()
                .map(|name| latest.job(name).map(|job| job_cell(job, &url)))
                .collect();

            Some(WorkflowCell {
                id: workflow.id.clone(),
                status: workflow.status.clone(),
                duration,
                running,
                url,
                jobs,
            })
        })
        .collect();

    PipelineRow {
        number: pipeline.number,
        created_at: pipeline.created_at,
        ref_name: pipeline.ref_name().to_string(),
        subject: pipeline.commit_subject().to_string(),
        commit_url: commit_url(pipeline),
        workflows,
    }
}

fn job_cell(job: &Job, workflow_url: &str) -> JobCell {
    JobCell {
        status: job.status.clone(),
        duration: job.duration_secs().map(format_duration),
        url: job.job_number.map(|number| job_url(workflow_url, number)),
    }
}
