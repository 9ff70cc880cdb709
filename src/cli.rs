use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::Token;
use crate::config::{Config, OutputFormat};
use crate::output::{self, PhaseProgress};
use crate::providers::circleci::aggregate::{aggregate, CiData};
use crate::providers::circleci::cache::{CacheStore, FileCache};
use crate::providers::circleci::client::{CircleCiClient, RerunRequest};
use crate::providers::circleci::crawler::{Crawler, PipelineSource};
use crate::providers::circleci::links::workflow_id_from;
use crate::providers::circleci::snapshot::Snapshot;
use crate::providers::circleci::timeline::layout;
use crate::providers::circleci::views::View;
use crate::report::{MatrixOptions, StatusMatrix};
use crate::server::{self, AppState};

#[derive(Parser)]
#[command(name = "cisummary")]
#[command(author, version, about = "CircleCI status matrix and job timelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write the result to this file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,

    /// Configuration file (defaults to ./cisummary.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CircleCI API token
    #[arg(long, global = true, env = "CIRCLECI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// CircleCI base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Don't read or write cached API responses
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    /// Remove the cache directory before running
    #[arg(long, global = true, default_value_t = false)]
    clear_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl pipelines and print the workflow/job status matrix
    Report {
        /// Only list pipelines of this branch
        branch: Option<String>,

        /// Project slug, e.g. gh/org/repo
        #[arg(short, long, conflicts_with = "org")]
        slug: Option<String>,

        /// Crawl every pipeline of an organization instead of one project
        #[arg(long)]
        org: Option<String>,

        #[arg(long, value_enum, default_value_t = View::All)]
        view: View,

        /// Pipeline pages to crawl
        #[arg(long)]
        pages: Option<u32>,

        /// Reuse the snapshot of the previous crawl instead of crawling
        #[arg(long, default_value_t = false)]
        cached: bool,

        /// Concurrent crawl workers
        #[arg(short = 'J', long)]
        jobs: Option<usize>,

        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Lay out a workflow's jobs on a timeline
    Timeline {
        /// Workflow id, or any URL ending in one
        workflow: String,

        /// Emit SVG instead of the row table
        #[arg(long, default_value_t = false)]
        svg: bool,
    },

    /// Re-run a workflow
    Rerun {
        workflow_id: String,

        /// Job ids to re-run (repeatable)
        #[arg(long = "job")]
        jobs: Vec<String>,

        /// Re-run only the failed jobs
        #[arg(long, default_value_t = false)]
        from_failed: bool,
    },

    /// Serve reports and timelines over HTTP
    Serve {
        #[arg(short, long)]
        bind: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(token) = &self.token {
            config.circleci.token = Some(token.clone());
        }
        if let Some(base_url) = &self.base_url {
            config.circleci.base_url.clone_from(base_url);
        }
        if self.no_cache {
            config.crawl.no_cache = true;
        }
        Ok(config)
    }

    fn client(&self, config: &Config, cache_dir: &Path) -> Result<Arc<CircleCiClient>> {
        let token = config.circleci.token.as_deref().map(Token::from);
        let cache: Option<Arc<dyn CacheStore>> = if config.crawl.no_cache {
            info!("Request cache disabled");
            None
        } else {
            Some(Arc::new(FileCache::new(cache_dir)?))
        };

        let client = CircleCiClient::new(&config.circleci.base_url, token, cache)?;
        Ok(Arc::new(client))
    }

    fn prepare(&self) -> Result<(Config, PathBuf)> {
        let config = self.load_config()?;
        let cache_dir = config.crawl.cache_dir()?;
        if self.clear_cache {
            FileCache::clear(&cache_dir)?;
        }
        Ok((config, cache_dir))
    }

    fn write_output(&self, contents: &[u8]) -> Result<()> {
        if let Some(output_path) = &self.output {
            std::fs::write(output_path, contents)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Output written to: {}", output_path.display());
        } else {
            std::io::stdout().write_all(contents)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_report(
        &self,
        branch: Option<&str>,
        slug: Option<&str>,
        org: Option<&str>,
        view: View,
        pages: Option<u32>,
        cached: bool,
        jobs: Option<usize>,
        format: Option<OutputFormat>,
    ) -> Result<()> {
        let (config, cache_dir) = self.prepare()?;

        let project_slug = slug.or(config.circleci.project_slug.as_deref());
        let (project, source, default_pages) = match (org, project_slug) {
            (Some(org), _) => {
                let source = PipelineSource::Organization {
                    org_slug: org.to_string(),
                };
                let pages = source.default_pages();
                (org.to_string(), source, pages)
            }
            (None, Some(slug)) => {
                let source = view.source(slug, branch);
                // An explicit branch keeps the short default budget
                let pages = if branch.is_some() {
                    source.default_pages()
                } else {
                    view.default_pages()
                };
                (slug.to_string(), source, pages)
            }
            (None, None) => {
                bail!("No project given: use --slug, --org or set circleci.project-slug")
            }
        };
        // Organization listings cannot narrow by branch
        let listed_branch = if org.is_none() { branch } else { None };

        let description = match branch {
            Some(branch) => format!("{view} @ {branch}"),
            None => view.to_string(),
        };
        let snapshot_view = branch.map_or_else(
            || view.to_string(),
            |b| format!("{view}-{}", b.replace('/', "-")),
        );
        let snapshot = Snapshot::for_project(&cache_dir, &project, &snapshot_view);
        let filter = view.filter(listed_branch, config.server.ignored_for(&project));

        let format = format.unwrap_or(config.report.format);
        let show_progress = format == OutputFormat::Summary && self.output.is_none();

        let data: CiData = if cached {
            snapshot.load()?.retain(|pipeline| filter(pipeline))
        } else {
            let client = self.client(&config, &cache_dir)?;
            let pages = pages.or(config.crawl.pages).unwrap_or(default_pages);

            let progress = show_progress.then(PhaseProgress::start_crawl);
            let mut crawler = Crawler::new(client)
                .with_workers(jobs.unwrap_or(config.crawl.jobs))
                .with_filter(filter);
            if let Some(progress) = &progress {
                crawler = crawler.with_progress(progress.bar());
            }

            let crawled = crawler.crawl(source, pages).await?;
            let progress =
                progress.map(|p| p.finish_crawl_start_aggregate(crawled.requests.total_requests));
            let data = aggregate(crawled);
            if let Some(progress) = progress {
                progress.finish_aggregate();
            }

            if let Err(e) = snapshot.save(&data) {
                warn!("Failed to save snapshot {}: {e}", snapshot.path().display());
            }
            data
        };

        let options = MatrixOptions {
            app_url: config.circleci.app_url.clone(),
            trailing_workflows: config.report.trailing_workflows.clone(),
        };
        let matrix = StatusMatrix::build(&data, &project, &description, &options, Utc::now());

        if format == OutputFormat::Summary && self.output.is_none() {
            output::print_summary(&matrix);
            return Ok(());
        }

        let mut buffer = Vec::new();
        output::export_matrix(&matrix, format, self.pretty || config.report.pretty, &mut buffer)?;
        self.write_output(&buffer)
    }

    async fn execute_timeline(&self, workflow: &str, svg: bool) -> Result<()> {
        let (config, cache_dir) = self.prepare()?;
        let client = self.client(&config, &cache_dir)?;
        let workflow_id = workflow_id_from(workflow);

        let (workflow, jobs) = futures::try_join!(
            client.workflow(workflow_id),
            client.workflow_jobs(workflow_id)
        )?;
        let (workflow, jobs) = (workflow.value, jobs.value);
        info!(
            "Laying out {} jobs of workflow {} ({})",
            jobs.len(),
            workflow.name,
            workflow.status
        );

        let chart = layout(&jobs).chart(&jobs);
        let title = format!("{} {}", workflow.name, workflow.id);

        if svg || self.output.is_some() {
            self.write_output(output::render_svg(&chart, &title).as_bytes())
        } else {
            output::print_timeline(&chart, &title);
            Ok(())
        }
    }

    async fn execute_rerun(
        &self,
        workflow_id: &str,
        jobs: &[String],
        from_failed: bool,
    ) -> Result<()> {
        let (config, cache_dir) = self.prepare()?;
        let client = self.client(&config, &cache_dir)?;

        let request = RerunRequest {
            jobs: jobs.to_vec(),
            from_failed,
        };
        let response = client.rerun_workflow(workflow_id, &request).await?;

        match response.workflow_id {
            Some(new_id) => println!("Re-running as workflow {new_id}"),
            None => println!("Re-run of workflow {workflow_id} requested"),
        }
        Ok(())
    }

    async fn execute_serve(&self, bind: Option<&str>, port: Option<u16>) -> Result<()> {
        let (mut config, cache_dir) = self.prepare()?;
        if let Some(bind) = bind {
            config.server.bind = bind.to_string();
        }
        if let Some(port) = port {
            config.server.port = port;
        }

        let client = self.client(&config, &cache_dir)?;
        server::serve(Arc::new(AppState {
            client,
            config,
            cache_dir,
        }))
        .await
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Report {
                branch,
                slug,
                org,
                view,
                pages,
                cached,
                jobs,
                format,
            } => {
                self.execute_report(
                    branch.as_deref(),
                    slug.as_deref(),
                    org.as_deref(),
                    *view,
                    *pages,
                    *cached,
                    *jobs,
                    *format,
                )
                .await
            }
            Commands::Timeline { workflow, svg } => self.execute_timeline(workflow, *svg).await,
            Commands::Rerun {
                workflow_id,
                jobs,
                from_failed,
            } => self.execute_rerun(workflow_id, jobs, *from_failed).await,
            Commands::Serve { bind, port } => self.execute_serve(bind.as_deref(), *port).await,
        }
    }
}
