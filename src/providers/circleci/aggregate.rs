use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};

use super::client::RequestCounts;
use super::crawler::{CrawlOutput, CrawlRecord};
use super::types::{Job, Pipeline, Workflow};

/// Everything one crawl learned, keyed by pipeline number.
///
/// This is also the on-disk snapshot format for cached replays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiData {
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requests: RequestCounts,
    pub pipelines: BTreeMap<u64, PipelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub pipeline: Pipeline,
    pub workflows: Vec<WorkflowEntry>,
    /// Workflow name → index in `workflows` of the most recently created
    /// instance with that name. Keys keep first-seen order.
    pub latest_by_name: IndexMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEntry {
    pub workflow: Workflow,
    pub jobs: Vec<Job>,
}

impl CiData {
    /// Pipelines ordered by number, newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &PipelineEntry> {
        self.pipelines.values().rev()
    }

    /// Keeps only the pipelines accepted by `keep`.
    #[must_use]
    pub fn retain(mut self, keep: impl Fn(&Pipeline) -> bool) -> Self {
        self.pipelines.retain(|_, entry| keep(&entry.pipeline));
        self
    }
}

impl PipelineEntry {
    /// The current attempt of the workflow called `name`.
    pub fn latest(&self, name: &str) -> Option<&WorkflowEntry> {
        self.latest_by_name
            .get(name)
            .and_then(|&index| self.workflows.get(index))
    }
}

impl WorkflowEntry {
    /// The job called `name`; with duplicate names the last one wins.
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().rev().find(|job| job.name == name)
    }
}

/// Assembles crawl records into per-pipeline workflow and job lists.
///
/// Records may arrive in any order. A pipeline whose workflow listing is
/// missing, or a workflow whose job listing is missing, is kept with an
/// empty list rather than dropped.
pub fn aggregate(output: CrawlOutput) -> CiData {
    let mut pipelines = Vec::new();
    let mut workflows_by_pipeline: HashMap<String, Vec<Workflow>> = HashMap::new();
    let mut jobs_by_workflow: HashMap<String, Vec<Job>> = HashMap::new();

    for record in output.records {
        match record {
            CrawlRecord::Pipeline(pipeline) => pipelines.push(pipeline),
            CrawlRecord::Workflows {
                pipeline_id,
                workflows,
            } => {
                workflows_by_pipeline.insert(pipeline_id, workflows);
            }
            CrawlRecord::Jobs { workflow_id, jobs } => {
                jobs_by_workflow.insert(workflow_id, jobs);
            }
        }
    }

    let mut entries = BTreeMap::new();
    for pipeline in pipelines {
        let workflows = workflows_by_pipeline
            .remove(&pipeline.id)
            .unwrap_or_else(|| {
                warn!("No workflow listing for pipeline {}", pipeline.number);
                Vec::new()
            });

        let workflows: Vec<WorkflowEntry> = workflows
            .into_iter()
            .map(|workflow| {
                let jobs = jobs_by_workflow.remove(&workflow.id).unwrap_or_else(|| {
                    warn!("No job listing for workflow {}", workflow.id);
                    Vec::new()
                });
                WorkflowEntry { workflow, jobs }
            })
            .collect();

        let latest_by_name = latest_by_name(&workflows);
        entries.insert(
            pipeline.number,
            PipelineEntry {
                pipeline,
                workflows,
                latest_by_name,
            },
        );
    }

    CiData {
        generated_at: Some(Utc::now()),
        requests: output.requests,
        pipelines: entries,
    }
}

fn latest_by_name(workflows: &[WorkflowEntry]) -> IndexMap<String, usize> {
    let mut latest: IndexMap<String, usize> = IndexMap::new();

    for (index, entry) in workflows.iter().enumerate() {
        let candidate = &entry.workflow;
        if candidate.created_at.is_none() {
            warn!(
                "Workflow {} ({}) has no creation time",
                candidate.id, candidate.name
            );
        }

        let replace = match latest.get(&candidate.name) {
            Some(&current) => supersedes(&workflows[current].workflow, candidate),
            None => true,
        };
        if replace {
            latest.insert(candidate.name.clone(), index);
        }
    }

    latest
}

/// Whether `candidate` is a newer attempt than `current`.
///
/// Equal timestamps favour the later-listed instance. An instance without
/// a creation time never displaces one that has it.
fn supersedes(current: &Workflow, candidate: &Workflow) -> bool {
    match (current.created_at, candidate.created_at) {
        (Some(current), Some(candidate)) => candidate >= current,
        (Some(_), None) => false,
        (None, _) => true,
    }
}
