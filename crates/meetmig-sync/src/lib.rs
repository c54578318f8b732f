//! Migration orchestration: fetch both systems, correlate, reconcile, snapshot.

pub mod associations;
pub mod config;
pub mod correlate;
pub mod fetch;
pub mod fuzzy;
pub mod reconcile;
pub mod report;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use meetmig_adapters::{AttioClient, HubSpotClient};
use meetmig_core::SourceRecord;
use meetmig_storage::{HttpClientConfig, HttpFetcher, SnapshotStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

pub use config::{MatcherConfig, MigrateConfig, Tuning};
pub use fetch::{FetchWindow, SkipReason};
pub use reconcile::{
    MatchReport, ReconcileSettings, Reconciler, RunMode, RunOptions, RunSummary, RunTally,
};

pub const CRATE_NAME: &str = "meetmig-sync";

/// Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339. Absent means
/// `lookback_days` before `now`.
pub fn parse_since(arg: Option<&str>, now: DateTime<Utc>, lookback_days: i64) -> Result<DateTime<Utc>> {
    match arg {
        None => Ok(now - Duration::days(lookback_days)),
        Some(text) => parse_date_arg(text),
    }
}

pub fn parse_date_arg(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("invalid date {text:?}; expected YYYY-MM-DD or RFC 3339"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid date {text:?}"))
}

#[derive(Debug, Clone, Default)]
pub struct MigrateArgs {
    pub since: Option<String>,
    pub until: Option<String>,
    pub apply: bool,
    pub fuzzy: bool,
}

fn http_fetcher(config: &MigrateConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        user_agent: Some(config.user_agent.clone()),
        ..HttpClientConfig::default()
    })
}

fn attio_client(config: &MigrateConfig, http: &HttpFetcher) -> Result<AttioClient> {
    Ok(AttioClient::new(
        http.clone(),
        config.attio_base_url.clone(),
        config.attio_api_key()?,
    ))
}

fn reconciler_from_config(config: &MigrateConfig) -> Result<Reconciler> {
    let http = http_fetcher(config)?;
    let source = attio_client(config, &http)?;
    let destination = HubSpotClient::new(
        http,
        config.hubspot_base_url.clone(),
        config.hubspot_access_token()?,
    );
    let settings = ReconcileSettings {
        page_delay: config.page_delay,
        call_delay: config.call_delay,
        tuning: Tuning::load(&config.tuning_path)?,
    };
    Ok(Reconciler::new(Box::new(source), Box::new(destination), settings))
}

fn window_from_args(
    config: &MigrateConfig,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<FetchWindow> {
    let now = Utc::now();
    let since = parse_since(since, now, config.lookback_days)?;
    let cutoff = match until {
        Some(text) => parse_date_arg(text)?,
        None => now,
    };
    if since > cutoff {
        bail!("since ({since}) is after the cutoff ({cutoff})");
    }
    Ok(FetchWindow {
        since: Some(since),
        cutoff,
        invoked_at: now,
    })
}

pub async fn run_migration_from_env(args: &MigrateArgs) -> Result<RunSummary> {
    let config = MigrateConfig::from_env();
    let window = window_from_args(&config, args.since.as_deref(), args.until.as_deref())?;
    if !args.apply {
        info!("dry run: no changes will be written (pass --apply to write)");
    }
    let reconciler =
        reconciler_from_config(&config)?.with_snapshots(SnapshotStore::new(&config.reports_dir));
    reconciler
        .run(&RunOptions {
            window,
            apply: args.apply,
            fuzzy_fallback: args.fuzzy,
        })
        .await
}

pub async fn run_match_from_env(since: Option<&str>) -> Result<MatchReport> {
    let config = MigrateConfig::from_env();
    let window = window_from_args(&config, since, None)?;
    reconciler_from_config(&config)?.preview_matches(&window).await
}

#[derive(Debug, Serialize)]
pub struct MeetingInspection {
    pub raw: JsonValue,
    pub normalized: Option<SourceRecord>,
    pub normalize_error: Option<String>,
    pub recordings: Vec<JsonValue>,
    pub transcripts: Vec<JsonValue>,
}

/// Raw and normalized views of one source meeting plus its recordings.
pub async fn inspect_meeting_from_env(meeting_id: &str, transcripts: bool) -> Result<MeetingInspection> {
    let config = MigrateConfig::from_env();
    let http = http_fetcher(&config)?;
    let client = attio_client(&config, &http)?;

    let raw = client
        .get_meeting(meeting_id)
        .await
        .with_context(|| format!("fetching meeting {meeting_id}"))?;
    let (normalized, normalize_error) = match SourceRecord::from_json(raw.clone()) {
        Ok(record) => (Some(record), None),
        Err(err) => (None, Some(err.to_string())),
    };

    let recordings = client
        .call_recordings(meeting_id)
        .await
        .with_context(|| format!("listing call recordings for {meeting_id}"))?;

    let mut fetched = Vec::new();
    if transcripts {
        for recording in &recordings {
            let Some(id) = recording_id(recording) else {
                warn!(meeting_id, "call recording without an id");
                continue;
            };
            match client.transcript(meeting_id, id).await {
                Ok(transcript) => fetched.push(transcript),
                Err(err) => warn!(meeting_id, recording_id = id, error = %err, "transcript unavailable"),
            }
            tokio::time::sleep(config.call_delay).await;
        }
    }

    Ok(MeetingInspection {
        raw,
        normalized,
        normalize_error,
        recordings,
        transcripts: fetched,
    })
}

fn recording_id(recording: &JsonValue) -> Option<&str> {
    let id = recording.get("id")?;
    id.as_str()
        .or_else(|| id.get("call_recording_id").and_then(JsonValue::as_str))
}

pub async fn report_runs_from_env(runs: usize) -> Result<String> {
    let config = MigrateConfig::from_env();
    report::report_runs_markdown(&SnapshotStore::new(&config.reports_dir), runs).await
}
