mod backoff;
mod core;
mod endpoints;

pub use self::core::{CircleCiClient, RequestCounts, DEFAULT_BASE_URL};
pub use endpoints::RerunRequest;
