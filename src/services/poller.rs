//! Client side of the status protocol: pull snapshots on an interval until
//! the job settles.
//!
//! `pending` is never an error here. A job that was never triggered simply
//! keeps reporting `pending` until the caller's `max_wait` runs out.
//! `stopped` ends the loop without retrying: resuming is an explicit
//! decision for whoever drives the poller.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, AppResult};
use crate::models::status::{JobSnapshot, OverallStatus};
use crate::services::orchestrator::TranscodeOrchestrator;

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, hash: &str) -> AppResult<JobSnapshot>;
}

#[async_trait]
impl StatusSource for TranscodeOrchestrator {
    async fn fetch(&self, hash: &str) -> AppResult<JobSnapshot> {
        Ok(self.status(hash).await)
    }
}

/// Polls a running server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpStatusSource {
    pub fn new(base: &str) -> AppResult<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| AppError::InvalidArgument(format!("invalid server url '{}': {}", base, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, base })
    }

    pub fn status_url(&self, hash: &str) -> AppResult<Url> {
        self.base
            .join(&format!("transcode/{}/status", hash))
            .map_err(|e| AppError::InvalidArgument(format!("invalid hash '{}': {}", hash, e)))
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, hash: &str) -> AppResult<JobSnapshot> {
        let url = self.status_url(hash)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(format!("GET {} returned {}", url, status)));
        }
        response
            .json::<JobSnapshot>()
            .await
            .map_err(|e| AppError::Internal(format!("invalid status body from {}: {}", url, e)))
    }
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Multiplier applied to the interval after each poll; `1.0` is fixed.
    pub backoff: f64,
    pub max_interval: Duration,
    /// Give up after this long. `None` polls until the job settles.
    pub max_wait: Option<Duration>,
    /// Consecutive fetch failures tolerated before the error is returned.
    pub max_errors: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            backoff: 1.0,
            max_interval: Duration::from_secs(15),
            max_wait: None,
            max_errors: 5,
        }
    }
}

impl PollOptions {
    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        current.mul_f64(self.backoff).min(self.max_interval.max(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job reached `ok` or `error`.
    Finished(JobSnapshot),
    /// The job is stopped and waits for a resume.
    Stopped(JobSnapshot),
    /// `max_wait` elapsed; carries the last snapshot seen, if any.
    GaveUp(Option<JobSnapshot>),
}

/// Polls `source` until the job settles. `on_update` sees every snapshot
/// that differs from the previous one.
pub async fn poll_until_settled<S, F>(
    source: &S,
    hash: &str,
    options: &PollOptions,
    mut on_update: F,
) -> AppResult<PollOutcome>
where
    S: StatusSource + ?Sized,
    F: FnMut(&JobSnapshot),
{
    let started = Instant::now();
    let mut interval = options.interval;
    let mut failures = 0u32;
    let mut last: Option<JobSnapshot> = None;

    loop {
        match source.fetch(hash).await {
            Ok(snapshot) => {
                failures = 0;
                if last.as_ref() != Some(&snapshot) {
                    on_update(&snapshot);
                }
                match snapshot.overall {
                    OverallStatus::Ok | OverallStatus::Error => {
                        return Ok(PollOutcome::Finished(snapshot))
                    }
                    OverallStatus::Stopped => return Ok(PollOutcome::Stopped(snapshot)),
                    OverallStatus::Pending | OverallStatus::Running => last = Some(snapshot),
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(hash = %hash, failures, "status poll failed: {}", e);
                if failures >= options.max_errors.max(1) {
                    return Err(e);
                }
            }
        }

        if let Some(max_wait) = options.max_wait {
            if started.elapsed() >= max_wait {
                return Ok(PollOutcome::GaveUp(last));
            }
        }
        tokio::time::sleep(interval).await;
        interval = options.next_interval(interval);
    }
}
