use thiserror::Error;

#[derive(Error, Debug)]
pub enum CISummaryError {
    #[error("CircleCI API request failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("No CircleCI token supplied (use --token, CIRCLECI_TOKEN or the config file)")]
    MissingToken,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Crawl aborted: {0}")]
    Crawl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CISummaryError>;
