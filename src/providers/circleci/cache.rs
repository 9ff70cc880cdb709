use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{CISummaryError, Result};

/// Kind of cacheable CircleCI resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Workflow,
    WorkflowJobs,
}

impl ResourceKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::WorkflowJobs => "workflow_jobs",
        }
    }
}

/// Cache entry key: resource kind plus resource id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: ResourceKind,
    pub id: String,
}

impl CacheKey {
    pub fn workflow(id: &str) -> Self {
        Self {
            kind: ResourceKind::Workflow,
            id: id.to_string(),
        }
    }

    pub fn workflow_jobs(id: &str) -> Self {
        Self {
            kind: ResourceKind::WorkflowJobs,
            id: id.to_string(),
        }
    }

    /// File name for this entry, e.g. `workflow_jobs-<uuid>.json`.
    ///
    /// Path separators in the id are replaced so every key maps to a file
    /// directly inside the cache directory.
    fn file_name(&self) -> String {
        let id: String = self
            .id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '-' } else { c })
            .collect();
        format!("{}-{id}.json", self.kind.as_str())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.id)
    }
}

/// Key-value storage for terminal API payloads.
///
/// Entries are only ever written for payloads that can no longer change,
/// so a stored entry is returned as-is without revalidation.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<()>;
}

/// One JSON file per cache entry inside a directory.
///
/// Default location is the platform cache directory:
/// - Linux: `~/.cache/cisummary/circleci/`
/// - macOS: `~/Library/Caches/cisummary/circleci/`
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens (creating if needed) a cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CISummaryError::Cache(format!(
                "Cannot create cache directory {}: {e}",
                dir.display()
            ))
        })?;
        debug!("Request cache at: {}", dir.display());
        Ok(Self { dir })
    }

    /// Platform default cache directory for this tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no cache directory.
    pub fn default_dir() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .ok_or_else(|| CISummaryError::Cache("No cache directory found".into()))?
            .join("cisummary")
            .join("circleci"))
    }

    /// Removes every cached entry (and snapshot) under `dir`.
    pub fn clear(dir: &Path) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
            info!("Cache cleared: {}", dir.display());
        } else {
            info!("No cache directory at: {}", dir.display());
        }
        Ok(())
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        // Write to a sibling file first so readers never observe a torn entry.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;
        debug!("Cached {key} at {}", path.display());
        Ok(())
    }
}
