mod queue;

use std::fmt;
use std::sync::Arc;

use indicatif::ProgressBar;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use self::queue::TaskQueue;
use super::client::{CircleCiClient, RequestCounts};
use super::types::{Job, Pipeline, Workflow};
use crate::error::{CISummaryError, Result};

pub const DEFAULT_WORKERS: usize = 32;

/// Decides which listed pipelines are crawled further.
pub type PipelineFilter = Arc<dyn Fn(&Pipeline) -> bool + Send + Sync>;

/// Where the pipeline listing comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSource {
    /// `project/{slug}/pipeline`, optionally restricted to one branch
    Project {
        slug: String,
        branch: Option<String>,
    },
    /// `pipeline?org-slug=…`
    Organization { org_slug: String },
}

impl PipelineSource {
    /// Page budget used when the caller does not pick one.
    pub fn default_pages(&self) -> u32 {
        match self {
            Self::Project {
                branch: Some(_), ..
            } => 2,
            _ => 8,
        }
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project {
                slug,
                branch: Some(branch),
            } => write!(f, "{slug}@{branch}"),
            Self::Project { slug, branch: None } => f.write_str(slug),
            Self::Organization { org_slug } => write!(f, "org {org_slug}"),
        }
    }
}

/// A unit of crawl work. Each task fetches one resource listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    ListPipelines {
        source: Arc<PipelineSource>,
        pages_remaining: u32,
        page_token: Option<String>,
    },
    ListWorkflows {
        pipeline_id: String,
    },
    ListJobs {
        workflow_id: String,
    },
}

/// A result emitted by a finished task.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlRecord {
    Pipeline(Pipeline),
    Workflows {
        pipeline_id: String,
        workflows: Vec<Workflow>,
    },
    Jobs {
        workflow_id: String,
        jobs: Vec<Job>,
    },
}

#[derive(Debug)]
pub struct CrawlOutput {
    pub records: Vec<CrawlRecord>,
    pub requests: RequestCounts,
}

/// Walks pipelines → workflows → jobs with a fixed pool of workers.
///
/// Workers share one task queue. A task may enqueue any number of
/// follow-ups (the next page, or child resources), and the crawl finishes
/// when every task ever enqueued has been processed. The first fetch error
/// aborts the whole crawl: a partial hierarchy would render a misleading
/// report.
pub struct Crawler {
    client: Arc<CircleCiClient>,
    workers: usize,
    filter: PipelineFilter,
    progress: ProgressBar,
}

struct WorkerContext {
    client: Arc<CircleCiClient>,
    filter: PipelineFilter,
    queue: TaskQueue<Task>,
    records: mpsc::UnboundedSender<CrawlRecord>,
    progress: ProgressBar,
}

impl Crawler {
    pub fn new(client: Arc<CircleCiClient>) -> Self {
        Self {
            client,
            workers: DEFAULT_WORKERS,
            filter: Arc::new(|_| true),
            progress: ProgressBar::hidden(),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: PipelineFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Reports task counts on `progress` while crawling.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Crawls up to `pages` pages of pipelines from `source`.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable fetch error, or a crawl error if a
    /// worker panicked.
    pub async fn crawl(&self, source: PipelineSource, pages: u32) -> Result<CrawlOutput> {
        info!(
            "Crawling {pages} page(s) of pipelines for {source} with {} workers",
            self.workers
        );

        let before = self.client.request_counts();
        let (records_tx, mut records_rx) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            client: Arc::clone(&self.client),
            filter: Arc::clone(&self.filter),
            queue: TaskQueue::new(),
            records: records_tx,
            progress: self.progress.clone(),
        });

        if pages == 0 {
            return Ok(CrawlOutput {
                records: Vec::new(),
                requests: RequestCounts::default(),
            });
        }

        context.queue.push(Task::ListPipelines {
            source: Arc::new(source),
            pages_remaining: pages,
            page_token: None,
        });

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(Arc::clone(&context).run());
        }

        loop {
            tokio::select! {
                () = context.queue.join() => break,
                Some(joined) = workers.join_next() => {
                    if let Err(e) = worker_outcome(joined) {
                        workers.abort_all();
                        return Err(e);
                    }
                }
            }
        }

        // Barrier released: idle workers observe the drained queue and exit.
        while let Some(joined) = workers.join_next().await {
            worker_outcome(joined)?;
        }

        let mut records = Vec::new();
        while let Ok(record) = records_rx.try_recv() {
            records.push(record);
        }

        // Shared clients serve several crawls; report only this one's share
        let requests = self.client.request_counts().since(before);
        info!(
            "Crawl finished: {} records, {}/{} uncached requests",
            records.len(),
            requests.uncached_requests,
            requests.total_requests
        );

        Ok(CrawlOutput { records, requests })
    }
}

fn worker_outcome(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| CISummaryError::Crawl(format!("worker failed: {e}")))?
}

impl WorkerContext {
    async fn run(self: Arc<Self>) -> Result<()> {
        while let Some(task) = self.queue.next().await {
            let outcome = self.process(task).await;
            self.queue.task_done();
            self.progress
                .set_prefix(format!("{} tasks outstanding", self.queue.outstanding()));
            outcome?;
        }
        Ok(())
    }

    fn emit(&self, record: CrawlRecord) {
        // The receiver lives until the crawl returns, so a send can only
        // fail after an abort, when nobody reads the records anyway.
        let _ = self.records.send(record);
    }

    async fn process(&self, task: Task) -> Result<()> {
        match task {
            Task::ListPipelines {
                source,
                pages_remaining,
                page_token,
            } => {
                let page = match source.as_ref() {
                    PipelineSource::Project { slug, branch } => {
                        self.client
                            .project_pipelines(slug, branch.as_deref(), page_token.as_deref())
                            .await?
                    }
                    PipelineSource::Organization { org_slug } => {
                        self.client
                            .org_pipelines(org_slug, page_token.as_deref())
                            .await?
                    }
                };
                debug!("Listed {} pipelines for {source}", page.items.len());

                for pipeline in page.items {
                    if !(self.filter)(&pipeline) {
                        debug!("Skipping pipeline {}", pipeline.number);
                        continue;
                    }
                    self.queue.push(Task::ListWorkflows {
                        pipeline_id: pipeline.id.clone(),
                    });
                    self.emit(CrawlRecord::Pipeline(pipeline));
                }

                if pages_remaining > 1 {
                    if let Some(token) = page.next_page_token {
                        self.queue.push(Task::ListPipelines {
                            source,
                            pages_remaining: pages_remaining - 1,
                            page_token: Some(token),
                        });
                    }
                }
            }
            Task::ListWorkflows { pipeline_id } => {
                let workflows = self.client.pipeline_workflows(&pipeline_id).await?;
                for workflow in &workflows {
                    self.queue.push(Task::ListJobs {
                        workflow_id: workflow.id.clone(),
                    });
                }
                self.emit(CrawlRecord::Workflows {
                    pipeline_id,
                    workflows,
                });
            }
            Task::ListJobs { workflow_id } => {
                let jobs = self.client.workflow_jobs(&workflow_id).await?;
                self.emit(CrawlRecord::Jobs {
                    workflow_id,
                    jobs: jobs.value,
                });
            }
        }
        Ok(())
    }
}
