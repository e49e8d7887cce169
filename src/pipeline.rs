//! One acquisition cycle: gate, fetch with bounded retries, publish, upload.
//!
//! A cycle reads a single settings snapshot and never raises out of
//! [`run_cycle`]; every failure is classified, logged, and folded into the
//! terminal [`CycleOutcome`] so the scheduler loop keeps ticking regardless
//! of what happened inside the cycle.

use crate::config::Settings;
use crate::error::{PullError, Result};
use crate::relay::FtpTarget;
use crate::store::{ArtifactStore, extension_for_content_type};
use chrono::{NaiveTime, Utc};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// Maximum fetch attempts per cycle.
pub const MAX_ATTEMPTS: u32 = 3;

/// Per-request timeout for the image fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Terminal outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Current time is outside the active window; nothing was attempted.
    Gated,
    /// No artifact was produced (fatal response or exhausted retries).
    Failed,
    /// Artifact written and latest pointer published.
    Completed {
        /// What happened to the optional upload step.
        upload: UploadStatus,
    },
}

/// Result of the optional upload step of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// No destination configured.
    Skipped,
    /// Transferred (and cleaned up, when configured).
    Done,
    /// Destination invalid or transfer failed; artifact and pointer remain.
    Failed,
}

/// Why a single fetch attempt did not produce an artifact.
#[derive(Debug)]
enum AttemptError {
    /// Transport, stream, or write failure; the next attempt may succeed.
    Retryable(String),
    /// Definitive non-success response; the cycle aborts without retrying.
    Fatal(String),
}

/// Build the HTTP client used for image fetches.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| PullError::Fetch(format!("cannot build http client: {e}")))
}

/// Whether `now` falls inside the inclusive daily window.
///
/// A window with `from > to` wraps past midnight and permits
/// `now >= from || now <= to`.
pub fn window_permits(from: NaiveTime, to: NaiveTime, now: NaiveTime) -> bool {
    if from <= to {
        now >= from && now <= to
    } else {
        now >= from || now <= to
    }
}

/// Execute one full fetch-retry-store-publish-upload cycle.
pub async fn run_cycle(
    client: &reqwest::Client,
    artifacts: &ArtifactStore,
    settings: &Settings,
) -> CycleOutcome {
    if !window_permits(settings.active_from, settings.active_to, Utc::now().time()) {
        info!(
            "outside active window {} - {}, sleeping",
            settings.active_from, settings.active_to
        );
        return CycleOutcome::Gated;
    }

    info!("pulling image from {}", settings.url);

    let mut artifact: Option<PathBuf> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let candidate = artifacts.candidate_path(Utc::now());
        match fetch_to_file(client, &settings.url, artifacts, &candidate).await {
            Ok(path) => {
                artifact = Some(path);
                break;
            }
            Err(AttemptError::Fatal(msg)) => {
                error!("{msg}, aborting cycle");
                return CycleOutcome::Failed;
            }
            Err(AttemptError::Retryable(msg)) => {
                warn!("failed to pull image (try {attempt}/{MAX_ATTEMPTS}): {msg}");
            }
        }
    }

    let Some(artifact) = artifact else {
        error!("all {MAX_ATTEMPTS} attempts failed, no artifact this cycle");
        return CycleOutcome::Failed;
    };

    if let Err(e) = artifacts.publish_latest(&artifact) {
        error!("artifact written but latest pointer not updated: {e}");
        return CycleOutcome::Failed;
    }

    let upload = match settings.ftp_uri.as_deref() {
        None => UploadStatus::Skipped,
        Some(uri) => upload_artifact(artifacts, settings, uri, &artifact).await,
    };

    info!("cycle done");
    CycleOutcome::Completed { upload }
}

/// One fetch attempt: GET, classify the response, stream the body to the
/// candidate file. Partial files are deleted before reporting a retryable
/// failure, so failed attempts leak nothing.
async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    artifacts: &ArtifactStore,
    candidate: &Path,
) -> std::result::Result<PathBuf, AttemptError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AttemptError::Retryable(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError::Fatal(format!("source answered {status}")));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let path = candidate.with_extension(extension_for_content_type(content_type));

    info!("saving image as {}", path.display());

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AttemptError::Retryable(format!("cannot create {}: {e}", path.display())))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                artifacts.discard(&path);
                return Err(AttemptError::Retryable(format!("body stream failed: {e}")));
            }
        };
        if let Err(e) = file.write_all(&bytes).await {
            artifacts.discard(&path);
            return Err(AttemptError::Retryable(format!("write failed: {e}")));
        }
    }

    if let Err(e) = file.flush().await {
        artifacts.discard(&path);
        return Err(AttemptError::Retryable(format!("flush failed: {e}")));
    }

    Ok(path)
}

/// Optional upload step. Failures leave the artifact and pointer untouched;
/// there is no upload retry.
async fn upload_artifact(
    artifacts: &ArtifactStore,
    settings: &Settings,
    uri: &str,
    artifact: &Path,
) -> UploadStatus {
    let target = match FtpTarget::from_uri(uri) {
        Ok(target) => target,
        Err(e) => {
            error!("{e}");
            return UploadStatus::Failed;
        }
    };

    info!("uploading file to ftp://{}", target.host);
    if let Err(e) = target.upload(artifact).await {
        error!("{e}");
        return UploadStatus::Failed;
    }

    if settings.delete_after_upload {
        match artifacts.absorb_into_latest(artifact) {
            Ok(()) => info!("artifact absorbed into latest after upload"),
            Err(e) => warn!("post-upload cleanup failed: {e}"),
        }
    }

    UploadStatus::Done
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn window_permits_inside_plain_window() {
        assert!(window_permits(t(6, 0), t(23, 0), t(12, 0)));
    }

    #[test]
    fn window_rejects_night_time_for_day_window() {
        // 06:00 - 23:00 at 02:00: gated.
        assert!(!window_permits(t(6, 0), t(23, 0), t(2, 0)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        assert!(window_permits(t(6, 0), t(23, 0), t(6, 0)));
        assert!(window_permits(t(6, 0), t(23, 0), t(23, 0)));
        assert!(!window_permits(t(6, 0), t(23, 0), t(23, 1)));
        assert!(!window_permits(t(6, 0), t(23, 0), t(5, 59)));
    }

    #[test]
    fn window_wraps_past_midnight_when_from_is_after_to() {
        let from = t(22, 0);
        let to = t(4, 0);
        assert!(window_permits(from, to, t(23, 30)));
        assert!(window_permits(from, to, t(1, 0)));
        assert!(window_permits(from, to, t(22, 0)));
        assert!(window_permits(from, to, t(4, 0)));
        assert!(!window_permits(from, to, t(12, 0)));
        assert!(!window_permits(from, to, t(4, 1)));
    }

    #[test]
    fn degenerate_window_permits_only_that_minute() {
        assert!(window_permits(t(9, 0), t(9, 0), t(9, 0)));
        assert!(!window_permits(t(9, 0), t(9, 0), t(9, 1)));
    }
}
