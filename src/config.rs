use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::providers::circleci::cache::FileCache;
use crate::providers::circleci::client::DEFAULT_BASE_URL;
use crate::providers::circleci::crawler::DEFAULT_WORKERS;
use crate::providers::circleci::links::DEFAULT_APP_URL;

/// Configuration file structure for cisummary.
///
/// Every value has a default, and command-line flags take precedence over
/// what the file says. Configuration files are loaded from the current
/// directory or the path given with `--config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub circleci: CircleCiConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircleCiConfig {
    /// CircleCI personal API token
    pub token: Option<String>,

    /// CircleCI instance base URL; the API lives under `/api/v2/`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Web app base URL, used for links in reports
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Project slug (e.g. 'gh/org/repo')
    pub project_slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Number of concurrent crawl workers
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Pipeline pages to crawl; the view decides when unset
    pub pages: Option<u32>,

    /// Directory for cached API responses and snapshots
    pub cache_dir: Option<PathBuf>,

    /// Disable the API response cache
    #[serde(default)]
    pub no_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Project slugs the server answers for; everything else is a 404
    #[serde(default)]
    pub allowed_slugs: Vec<String>,

    /// Pipeline numbers never shown, per project slug
    #[serde(default)]
    pub ignored_pipelines: BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportConfig {
    /// Default output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,

    /// Workflow columns pinned to the right end of the matrix
    #[serde(default = "default_trailing_workflows")]
    pub trailing_workflows: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Html,
}

impl Default for CircleCiConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_base_url(),
            app_url: default_app_url(),
            project_slug: None,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            pages: None,
            cache_dir: None,
            no_cache: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            allowed_slugs: Vec::new(),
            ignored_pipelines: BTreeMap::new(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Summary,
            pretty: false,
            trailing_workflows: default_trailing_workflows(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}

fn default_jobs() -> usize {
    DEFAULT_WORKERS
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9999
}

fn default_trailing_workflows() -> Vec<String> {
    vec!["nightly".to_string()]
}

impl CrawlConfig {
    /// The configured cache directory, or the per-user default.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(FileCache::default_dir()?),
        }
    }
}

impl ServerConfig {
    pub fn is_allowed(&self, slug: &str) -> bool {
        self.allowed_slugs.iter().any(|allowed| allowed == slug)
    }

    pub fn ignored_for(&self, slug: &str) -> HashSet<u64> {
        self.ignored_pipelines
            .get(slug)
            .map(|numbers| numbers.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cisummary.toml
    /// 3. ./cisummary.json
    /// 4. ./cisummary.yaml
    /// 5. ./cisummary.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "cisummary.toml",
            "cisummary.json",
            "cisummary.yaml",
            "cisummary.yml",
        ];
        Self::load_first(Path::new("."), &candidates)
    }

    fn load_first(dir: &Path, candidates: &[&str]) -> Result<Self> {
        for candidate in candidates {
            let path = dir.join(candidate);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.circleci.base_url, "https://circleci.com");
        assert_eq!(config.circleci.app_url, "https://app.circleci.com");
        assert_eq!(config.crawl.jobs, 32);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.report.trailing_workflows, vec!["nightly"]);
        assert!(!config.crawl.no_cache);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[circleci]
token = "cci-test-token"
project-slug = "gh/acme/app"

[crawl]
jobs = 8
pages = 3
no-cache = true

[server]
port = 8080
allowed-slugs = ["gh/acme/app"]

[server.ignored-pipelines]
"gh/acme/app" = [12, 13]

[report]
format = "html"
trailing-workflows = ["nightly", "weekly"]
"#;
        write!(temp_file, "{toml_content}").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.circleci.token.as_deref(), Some("cci-test-token"));
        assert_eq!(config.circleci.base_url, "https://circleci.com");
        assert_eq!(config.circleci.project_slug.as_deref(), Some("gh/acme/app"));
        assert_eq!(config.crawl.jobs, 8);
        assert_eq!(config.crawl.pages, Some(3));
        assert!(config.crawl.no_cache);
        assert_eq!(config.server.port, 8080);
        assert!(config.server.is_allowed("gh/acme/app"));
        assert!(!config.server.is_allowed("gh/acme/other"));
        assert_eq!(config.server.ignored_for("gh/acme/app"), HashSet::from([12, 13]));
        assert!(config.server.ignored_for("gh/acme/other").is_empty());
        assert_eq!(config.report.format, OutputFormat::Html);
        assert_eq!(config.report.trailing_workflows, vec!["nightly", "weekly"]);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "circleci": {
    "token": "cci-json-token",
    "base-url": "https://circleci.example.com"
  },
  "report": {
    "format": "json",
    "pretty": true
  }
}"#;
        write!(temp_file, "{json_content}").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.circleci.token.as_deref(), Some("cci-json-token"));
        assert_eq!(config.circleci.base_url, "https://circleci.example.com");
        assert_eq!(config.report.format, OutputFormat::Json);
        assert!(config.report.pretty);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = "crawl:\n  cache-dir: /tmp/cisummary\n  jobs: 4\n";
        write!(temp_file, "{yaml_content}").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.crawl.jobs, 4);
        assert_eq!(config.crawl.cache_dir().unwrap(), PathBuf::from("/tmp/cisummary"));
    }

    #[test]
    fn test_load_nonexistent_config_is_an_error() {
        assert!(Config::load(Some(Path::new("nonexistent.toml"))).is_err());
    }

    #[test]
    fn test_load_first_candidate_in_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("cisummary.yml"),
            "circleci:\n  token: yml-token\n",
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("cisummary.toml"),
            "[circleci]\ntoken = \"toml-token\"\n",
        )
        .unwrap();

        let config =
            Config::load_first(temp_dir.path(), &["cisummary.toml", "cisummary.yml"]).unwrap();
        assert_eq!(config.circleci.token.as_deref(), Some("toml-token"));

        let empty = tempfile::tempdir().unwrap();
        let config = Config::load_first(empty.path(), &["cisummary.toml"]).unwrap();
        assert!(config.circleci.token.is_none());
    }
}
