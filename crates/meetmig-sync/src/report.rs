//! Run snapshots on disk and their markdown renderings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use meetmig_storage::{SnapshotStore, MANIFEST_FILE};
use serde_json::Value as JsonValue;

use crate::reconcile::{RunMode, RunPlan, RunSummary};

pub const PLAN_FILE: &str = "plan.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CREATED_FILE: &str = "created.json";
pub const BRIEF_FILE: &str = "brief.md";

/// Source id -> destination id for everything created by earlier runs.
pub async fn load_previous_mappings(store: &SnapshotStore) -> Result<BTreeMap<String, String>> {
    store
        .load_merged_maps(CREATED_FILE)
        .await
        .context("loading previous run mappings")
}

/// Written before the first destination write so an interrupted run still
/// leaves a record of what it meant to do.
pub async fn write_plan(store: &SnapshotStore, run_key: &str, plan: &RunPlan) -> Result<()> {
    store
        .write_json(run_key, PLAN_FILE, plan)
        .await
        .context("writing run plan")?;
    Ok(())
}

/// Summary, id mapping, brief and manifest. Returns the run directory.
pub async fn write_run_outputs(store: &SnapshotStore, summary: &RunSummary) -> Result<PathBuf> {
    let run = summary.run_key.as_str();
    store.write_json(run, SUMMARY_FILE, summary).await?;
    if !summary.created.is_empty() {
        store.write_json(run, CREATED_FILE, &summary.created).await?;
    }
    store
        .write_text(run, BRIEF_FILE, &render_brief(summary))
        .await?;
    store.write_manifest(run).await?;
    Ok(store.run_dir(run))
}

pub fn render_brief(summary: &RunSummary) -> String {
    let t = &summary.tally;
    let mode = match summary.mode {
        RunMode::DryRun => "dry run",
        RunMode::Apply => "apply",
    };
    let mut lines = vec![
        format!("# Meeting Migration `{}`", summary.run_key),
        String::new(),
        format!("- mode: {mode}"),
        format!(
            "- {} -> {}",
            summary.source_system, summary.destination_system
        ),
        format!(
            "- fetched: {} source / {} destination",
            summary.fetched_source, summary.fetched_destination
        ),
        format!("- processed: {}", t.processed),
        format!("- created: {}", t.created),
        format!("- already present: {} ({} fuzzy)", t.already_present, t.fuzzy_matched),
        format!(
            "- associations added: {} (failed: {})",
            t.associations_added, t.association_failures
        ),
        format!("- bodies upgraded: {}", t.bodies_upgraded),
        format!("- errors: {}", t.errors),
    ];
    if !t.skipped.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped".to_string());
        for (reason, count) in &t.skipped {
            lines.push(format!("- {reason}: {count}"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Most recent `runs` run directories, newest first.
pub async fn report_runs_markdown(store: &SnapshotStore, runs: usize) -> Result<String> {
    let mut keys = store.runs().await?;
    keys.reverse();
    keys.truncate(runs.max(1));

    let mut lines = vec!["# Migration Runs".to_string(), String::new()];
    if keys.is_empty() {
        lines.push(format!("No runs under `{}`.", store.root().display()));
        return Ok(lines.join("\n"));
    }

    for key in keys {
        let dir = store.run_dir(&key);
        lines.push(format!("## Run `{key}`"));

        match store.read_json::<JsonValue>(&key, SUMMARY_FILE).await {
            Ok(summary) => {
                let mode = summary
                    .get("mode")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown");
                let tally = summary.get("tally");
                let count = |field: &str| {
                    tally
                        .and_then(|t| t.get(field))
                        .and_then(JsonValue::as_u64)
                        .unwrap_or(0)
                };
                let skipped: u64 = tally
                    .and_then(|t| t.get("skipped"))
                    .and_then(JsonValue::as_object)
                    .map(|m| m.values().filter_map(JsonValue::as_u64).sum())
                    .unwrap_or(0);
                lines.push(format!("- mode: {mode}"));
                lines.push(format!("- processed: {}", count("processed")));
                lines.push(format!("- created: {}", count("created")));
                lines.push(format!("- skipped: {skipped}"));
                lines.push(format!("- errors: {}", count("errors")));
            }
            Err(_) if dir.join(PLAN_FILE).exists() => {
                lines.push("- incomplete: plan written, no summary".to_string());
            }
            Err(err) => {
                lines.push(format!("- unreadable: {err:#}"));
            }
        }
        if dir.join(BRIEF_FILE).exists() {
            lines.push(format!("- brief: `{}`", dir.join(BRIEF_FILE).display()));
        }
        if dir.join(MANIFEST_FILE).exists() {
            lines.push(format!("- manifest: `{}`", dir.join(MANIFEST_FILE).display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::SkipReason;
    use crate::reconcile::RunTally;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn summary(run_key: &str) -> RunSummary {
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap();
        let mut tally = RunTally {
            processed: 3,
            created: 1,
            ..RunTally::default()
        };
        tally.skipped.insert(SkipReason::NoStartTime, 1);
        tally.skipped.insert(SkipReason::ScheduledAfterCutoff, 1);
        RunSummary {
            run_id: Uuid::nil(),
            run_key: run_key.to_string(),
            mode: RunMode::Apply,
            started_at: at,
            finished_at: at,
            source_system: "Attio".into(),
            destination_system: "HubSpot".into(),
            fetched_source: 3,
            fetched_destination: 0,
            tally,
            created: BTreeMap::from([("src-1".to_string(), "900".to_string())]),
            reports_dir: None,
        }
    }

    #[test]
    fn brief_lists_skip_reasons() {
        let brief = render_brief(&summary("20260310_120000"));
        assert!(brief.contains("- mode: apply"));
        assert!(brief.contains("- created: 1"));
        assert!(brief.contains("- no_start_time: 1"));
        assert!(brief.contains("- scheduled_after_cutoff: 1"));
    }

    #[tokio::test]
    async fn outputs_feed_the_runs_report_and_later_mappings() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());

        let run_dir = write_run_outputs(&store, &summary("20260310_120000"))
            .await
            .expect("write");
        assert!(run_dir.join(MANIFEST_FILE).exists());
        store
            .write_text("20260311_090000", PLAN_FILE, "{}")
            .await
            .expect("plan");

        let mapped = load_previous_mappings(&store).await.expect("maps");
        assert_eq!(mapped.get("src-1").map(String::as_str), Some("900"));

        let md = report_runs_markdown(&store, 5).await.expect("report");
        let newest = md.find("20260311_090000").expect("newest run listed");
        let older = md.find("20260310_120000").expect("older run listed");
        assert!(newest < older);
        assert!(md.contains("- incomplete: plan written, no summary"));
        assert!(md.contains("- skipped: 2"));
    }

    #[tokio::test]
    async fn empty_store_reports_no_runs() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("missing"));
        let md = report_runs_markdown(&store, 3).await.expect("report");
        assert!(md.contains("No runs under"));
    }
}
