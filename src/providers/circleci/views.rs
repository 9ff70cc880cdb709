use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::crawler::{PipelineFilter, PipelineSource};
use super::types::Pipeline;

/// Named report views over a project's pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Every pipeline
    #[default]
    All,
    /// Pipelines on the `main` branch
    Main,
    /// Pull-request pipelines (`pull/…` branches)
    Pulls,
    /// Tag pipelines
    Tags,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Main => "main",
            Self::Pulls => "pulls",
            Self::Tags => "tags",
        }
    }

    /// Branch passed to the pipeline listing, if the view narrows it.
    pub fn branch(self) -> Option<&'static str> {
        match self {
            Self::Main => Some("main"),
            _ => None,
        }
    }

    pub fn default_pages(self) -> u32 {
        match self {
            Self::All => 8,
            Self::Main | Self::Pulls => 5,
            Self::Tags => 12,
        }
    }

    pub fn accepts(self, pipeline: &Pipeline) -> bool {
        match self {
            Self::All => true,
            Self::Main => pipeline.vcs.branch.as_deref() == Some("main"),
            Self::Pulls => pipeline
                .vcs
                .branch
                .as_deref()
                .is_some_and(|branch| branch.starts_with("pull/")),
            Self::Tags => pipeline.vcs.tag.is_some(),
        }
    }

    /// Pipeline source for `slug`; an explicit branch overrides the view's.
    pub fn source(self, slug: &str, branch: Option<&str>) -> PipelineSource {
        PipelineSource::Project {
            slug: slug.to_string(),
            branch: branch.or(self.branch()).map(ToString::to_string),
        }
    }

    /// Crawl filter: the view predicate minus explicitly ignored pipelines.
    ///
    /// An explicit branch replaces the view's own selection, so only the
    /// ignored pipelines are dropped then.
    pub fn filter(self, branch: Option<&str>, ignored: HashSet<u64>) -> PipelineFilter {
        let by_view = branch.is_none();
        Arc::new(move |pipeline: &Pipeline| {
            !ignored.contains(&pipeline.number) && (!by_view || self.accepts(pipeline))
        })
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "main" => Ok(Self::Main),
            "pulls" => Ok(Self::Pulls),
            "tags" => Ok(Self::Tags),
            other => Err(format!("unknown view: {other}")),
        }
    }
}
