//! Web configuration surface.
//!
//! One page: `GET /` renders the current settings as a form plus a rolling
//! tail of the log file, `POST /` validates and replaces the settings, then
//! restarts the pull worker so the new interval takes effect immediately.
//! Deliberately thin: no auth, no templating engine, no other routes.

use crate::config::{Settings, SettingsStore};
use crate::pipeline;
use crate::relay::FtpTarget;
use crate::scheduler::PullScheduler;
use crate::store::ArtifactStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use chrono::NaiveTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use url::Url;

/// Number of log lines shown on the settings page.
const LOG_TAIL_LINES: usize = 200;

/// Everything the handlers and the pull job share.
pub struct AppState {
    /// Current settings + persistence.
    pub settings: SettingsStore,
    /// Artifact directory and latest pointer.
    pub artifacts: ArtifactStore,
    /// HTTP client used by the pipeline.
    pub client: reqwest::Client,
    /// The single pull worker; locked only while (re)starting or stopping.
    pub scheduler: Mutex<PullScheduler>,
    /// Log file surfaced as the page's log tail.
    pub log_path: PathBuf,
}

/// Build the router for the configuration page.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(show_settings).post(update_settings))
        .with_state(state)
}

/// (Re)start the pull worker with the currently stored interval.
///
/// Each tick takes its own settings snapshot, so URL or window edits apply
/// on the next cycle even without a restart; the restart is what applies a
/// new interval.
pub async fn start_job(state: &Arc<AppState>) {
    let interval = state.settings.snapshot().interval();
    let job_state = Arc::clone(state);

    let mut scheduler = state.scheduler.lock().await;
    scheduler
        .start(interval, move || {
            let state = Arc::clone(&job_state);
            async move {
                let snapshot = state.settings.snapshot();
                pipeline::run_cycle(&state.client, &state.artifacts, &snapshot).await;
            }
        })
        .await;
}

/// Stop the pull worker, waiting for an in-flight cycle to finish.
pub async fn stop_job(state: &Arc<AppState>) {
    state.scheduler.lock().await.stop().await;
}

async fn show_settings(State(state): State<Arc<AppState>>) -> Html<String> {
    let settings = state.settings.snapshot();
    let log = tail_log(&state.log_path, LOG_TAIL_LINES).await;
    Html(render_page(&settings, &log))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Response {
    let settings = match form.into_settings() {
        Ok(settings) => settings,
        Err(msg) => return (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response(),
    };

    if let Err(e) = state.settings.replace(settings) {
        error!("cannot save settings: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("cannot save settings: {e}"))
            .into_response();
    }

    start_job(&state).await;
    info!("settings updated: {:?}", state.settings.snapshot());
    Redirect::to("/").into_response()
}

/// Raw form fields as posted by the settings page.
#[derive(Debug, serde::Deserialize)]
pub struct SettingsForm {
    url: String,
    interval: String,
    active_from: String,
    active_to: String,
    #[serde(default)]
    ftp_uri: String,
    /// Checkbox: present ("on") when ticked, absent otherwise.
    #[serde(default)]
    delete_after_upload: Option<String>,
}

impl SettingsForm {
    /// Validate the posted fields into a full [`Settings`] record.
    fn into_settings(self) -> std::result::Result<Settings, String> {
        let url = self.url.trim().to_owned();
        let parsed = Url::parse(&url).map_err(|e| format!("invalid url: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("url must be http(s), got '{}'", parsed.scheme()));
        }

        let interval_minutes: u64 = self
            .interval
            .trim()
            .parse()
            .map_err(|_| format!("invalid interval '{}'", self.interval))?;
        if interval_minutes == 0 {
            return Err("interval must be at least 1 minute".to_owned());
        }

        let active_from = parse_time(&self.active_from)?;
        let active_to = parse_time(&self.active_to)?;

        let ftp_uri = match self.ftp_uri.trim() {
            "" => None,
            uri => {
                // Reject unusable destinations at edit time, not mid-cycle.
                FtpTarget::from_uri(uri).map_err(|e| e.to_string())?;
                Some(uri.to_owned())
            }
        };

        Ok(Settings {
            url,
            interval_minutes,
            active_from,
            active_to,
            ftp_uri,
            delete_after_upload: self.delete_after_upload.is_some(),
        })
    }
}

fn parse_time(raw: &str) -> std::result::Result<NaiveTime, String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| format!("invalid time '{raw}', expected HH:MM"))
}

/// Last `max_lines` lines of the log file, or empty when unreadable.
async fn tail_log(path: &Path, max_lines: usize) -> String {
    let Ok(contents) = tokio::fs::read_to_string(path).await else {
        return String::new();
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

fn render_page(settings: &Settings, log: &str) -> String {
    let checked = if settings.delete_after_upload {
        " checked"
    } else {
        ""
    };
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>imgpull</title></head>
<body>
<h1>Image pull settings</h1>
<form method="post" action="/">
  <label>Url to pull image from
    <input type="url" name="url" value="{url}" required></label><br>
  <label>Pull interval in minutes
    <input type="number" name="interval" min="1" value="{interval}" required></label><br>
  <label>Capture start time
    <input type="time" name="active_from" value="{from}" required></label><br>
  <label>Capture end time
    <input type="time" name="active_to" value="{to}" required></label><br>
  <label>FTP server to upload files to
    <input type="url" name="ftp_uri" value="{ftp}"></label><br>
  <label>Delete photos after successful upload
    <input type="checkbox" name="delete_after_upload"{checked}></label><br>
  <button type="submit">Save</button>
</form>
<h2>Log</h2>
<pre>{log}</pre>
</body>
</html>
"#,
        url = escape_html(&settings.url),
        interval = settings.interval_minutes,
        from = settings.active_from.format("%H:%M"),
        to = settings.active_to.format("%H:%M"),
        ftp = escape_html(settings.ftp_uri.as_deref().unwrap_or_default()),
        checked = checked,
        log = escape_html(log),
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
