//! Polling submitted jobs until they settle
//!
//! Two states: polling and done. Each iteration fetches the whole batch and
//! evaluates it as one unit:
//!
//! - every job streaming or complete → done, return the snapshot
//! - every job errored → done, return the snapshot as-is
//! - anything else → keep the snapshot, pause, renew (blocking), repeat
//!
//! When the window elapses the last snapshot is returned even if it is not
//! terminal. Callers must re-check status in that case.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::delay::DelayRange;
use crate::error::{Error, Result};
use crate::models::{GenerationJob, JobStatus, LyricsResult};
use crate::session::Session;

/// Poll window for generation jobs, in seconds.
pub const POLL_WINDOW_SECS: u64 = 100;

/// Pause before the first poll, in seconds.
pub const INITIAL_DELAY_SECS: u64 = 5;

/// Randomized pause between polls, in seconds.
pub const POLL_INTERVAL_SECS: (u64, u64) = (3, 6);

/// Fixed pause between lyrics polls, in seconds.
pub const LYRICS_INTERVAL_SECS: u64 = 2;

/// Timing for `await_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub window: Duration,
    pub initial_delay: DelayRange,
    pub interval: DelayRange,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(POLL_WINDOW_SECS),
            initial_delay: DelayRange::fixed(INITIAL_DELAY_SECS),
            interval: DelayRange::between(POLL_INTERVAL_SECS.0, POLL_INTERVAL_SECS.1),
        }
    }
}

/// Timing for lyrics polling. `window: None` polls until complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LyricsPollConfig {
    pub interval: Duration,
    pub window: Option<Duration>,
}

impl Default for LyricsPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(LYRICS_INTERVAL_SECS),
            window: None,
        }
    }
}

/// Batch verdict for one fetched snapshot.
fn is_settled(jobs: &[GenerationJob]) -> bool {
    if jobs.is_empty() {
        return false;
    }
    jobs.iter().all(|j| j.status.is_ready()) || jobs.iter().all(|j| j.status == JobStatus::Error)
}

/// Poll `job_ids` on `session` until the batch settles or the window elapses.
///
/// Fetch and renewal failures inside the loop count as a non-terminal
/// iteration. If the window closes without a single successful fetch, the
/// last failure is returned instead of an empty snapshot.
pub async fn await_completion(
    session: &Session,
    job_ids: &[String],
    config: &PollConfig,
) -> Result<Vec<GenerationJob>> {
    let started = Instant::now();
    let deadline = started + config.window;
    let mut latest: Option<Vec<GenerationJob>> = None;
    let mut last_error: Option<Error> = None;

    config
        .initial_delay
        .sleep_at_most(deadline.saturating_duration_since(Instant::now()))
        .await;

    while Instant::now() < deadline {
        match session.fetch_feed(job_ids, None).await {
            Ok(jobs) => {
                if is_settled(&jobs) {
                    info!(
                        account = %session.account(),
                        jobs = jobs.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "generation jobs settled"
                    );
                    return Ok(jobs);
                }
                debug!(jobs = jobs.len(), "jobs still pending");
                latest = Some(jobs);
            }
            Err(e) => {
                warn!(error = %e, "feed fetch failed while polling");
                last_error = Some(e);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        config.interval.sleep_at_most(remaining).await;
        if Instant::now() >= deadline {
            break;
        }

        if let Err(e) = session.renew(true).await {
            warn!(error = %e, "token renewal failed while polling");
        }
    }

    match (latest, last_error) {
        (Some(jobs), _) => {
            warn!(
                account = %session.account(),
                window_secs = config.window.as_secs(),
                "poll window elapsed, returning last snapshot"
            );
            Ok(jobs)
        }
        (None, Some(e)) => Err(e),
        (None, None) => Ok(Vec::new()),
    }
}

/// Poll a lyrics job every `interval` until it reports `complete`.
///
/// A failed fetch is logged and retried on the next tick, like the
/// generation poller. Without a window this waits indefinitely; the studio
/// has always finished lyrics jobs, but nothing guarantees it.
pub async fn await_lyrics(
    session: &Session,
    lyrics_id: &str,
    config: &LyricsPollConfig,
) -> Result<LyricsResult> {
    let started = Instant::now();
    let mut last_seen = String::from("not fetched");

    loop {
        match session.fetch_lyrics(lyrics_id).await {
            Ok(result) if result.is_complete() => {
                debug!(lyrics_id, "lyrics complete");
                return Ok(result);
            }
            Ok(result) => last_seen = result.status,
            Err(e @ Error::InvalidInput(_)) => return Err(e),
            Err(e) => {
                warn!(lyrics_id, error = %e, "lyrics fetch failed while polling");
                last_seen = format!("fetch failed: {e}");
            }
        }

        if let Some(window) = config.window
            && started.elapsed() >= window
        {
            return Err(Error::Upstream(format!(
                "lyrics generation timed out after {}s (status: {last_seen})",
                window.as_secs(),
            )));
        }
        tokio::time::sleep(config.interval).await;
    }
}
