use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::aggregate::CiData;
use crate::error::{CISummaryError, Result};

/// Single-file snapshot of the aggregated crawl.
///
/// Written after every full crawl; a cached run reads it back instead of
/// crawling at all.
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot location for a project slug and report view under `cache_dir`,
    /// e.g. `snapshots/gh-acme-app-main.json`.
    pub fn for_project(cache_dir: &Path, slug: &str, view: &str) -> Self {
        let file_name = format!("{}-{view}.json", slug.replace('/', "-"));
        Self::new(cache_dir.join("snapshots").join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, data: &CiData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, content)?;
        debug!(
            "Saved snapshot of {} pipelines to {}",
            data.pipelines.len(),
            self.path.display()
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a cache error when no snapshot has been written yet.
    pub fn load(&self) -> Result<CiData> {
        if !self.path.exists() {
            return Err(CISummaryError::Cache(format!(
                "No snapshot at {}; run once without --cached first",
                self.path.display()
            )));
        }
        let content = fs::read_to_string(&self.path)?;
        let data: CiData = serde_json::from_str(&content)?;
        info!(
            "Loaded snapshot of {} pipelines from {}",
            data.pipelines.len(),
            self.path.display()
        );
        Ok(data)
    }
}
