use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::Result;

/// Outcome of one HTTP attempt that did not fail fatally.
#[derive(Debug, PartialEq)]
pub(super) enum Attempt {
    Done(Vec<u8>),
    RetryAfter(Duration),
}

/// Reads a `Retry-After` hint expressed in whole seconds.
///
/// `Retry-After: 0` is a valid hint (retry immediately). Anything that is not
/// a non-negative integer counts as no hint at all.
pub(super) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Repeats `attempt` until it yields a body, sleeping for every retry hint.
///
/// There is no retry limit: a persistently rate-limited endpoint stalls
/// here. Errors from `attempt` are returned immediately.
pub(super) async fn with_retry_after<A, AFut, S, SFut>(
    label: &str,
    mut attempt: A,
    mut sleep: S,
) -> Result<Vec<u8>>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<Attempt>>,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    loop {
        match attempt().await? {
            Attempt::Done(body) => return Ok(body),
            Attempt::RetryAfter(delay) => {
                if delay.is_zero() {
                    debug!("Rate limited on {label}, retrying immediately");
                } else {
                    warn!("Rate limited on {label}, retrying after {}s", delay.as_secs());
                }
                sleep(delay).await;
            }
        }
    }
}
