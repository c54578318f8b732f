//! End-to-end run: fetch, correlate, create missing meetings, fix existing ones.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use meetmig_adapters::{DestinationSystem, SourceSystem};
use meetmig_core::{AssociationKind, AssociationLink, DestinationRecord, SourceRecord};
use meetmig_storage::SnapshotStore;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::associations::{AssociationResolver, ResolutionCache, ResolvedAssociations};
use crate::config::Tuning;
use crate::correlate::{correlate_with_prior, Correlation};
use crate::fetch::{FetchWindow, Rejection, SkipReason, SourceFetcher, TargetFetcher};
use crate::fuzzy::FuzzyMatcher;
use crate::report;
use crate::transform::{roster_lines, RecordTransformer, TransformError};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub page_delay: Duration,
    /// Fixed pause after every per-record API call.
    pub call_delay: Duration,
    pub tuning: Tuning,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(300),
            call_delay: Duration::from_millis(250),
            tuning: Tuning::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub window: FetchWindow,
    pub apply: bool,
    pub fuzzy_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Apply,
}

/// Counters for one run. In dry-run mode they count intended writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTally {
    pub processed: usize,
    pub created: usize,
    pub already_present: usize,
    pub fuzzy_matched: usize,
    pub associations_added: usize,
    pub association_failures: usize,
    pub bodies_upgraded: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub errors: usize,
}

impl RunTally {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FuzzyPairView {
    pub source_id: String,
    pub destination_id: String,
    pub score: f64,
    pub title_score: f64,
    pub date_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedCreate {
    pub source_id: String,
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
}

/// Everything decided before the first write call.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub window_since: Option<DateTime<Utc>>,
    pub window_cutoff: DateTime<Utc>,
    pub creates: Vec<PlannedCreate>,
    pub existing_pairs: Vec<(String, String)>,
    pub fuzzy_pairs: Vec<FuzzyPairView>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_key: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_system: String,
    pub destination_system: String,
    pub fetched_source: usize,
    pub fetched_destination: usize,
    pub tally: RunTally,
    /// Source id -> destination id for meetings created in this run.
    pub created: BTreeMap<String, String>,
    pub reports_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub identity_pairs: usize,
    pub fuzzy_pairs: Vec<FuzzyPairView>,
    pub unmatched_source: Vec<String>,
    pub unmatched_destination: Vec<String>,
}

struct FallbackResult {
    pairs: Vec<FuzzyPairView>,
    unmatched_destination: Vec<String>,
}

/// Runs the fuzzy matcher over sources the id join left unpaired, against
/// destinations that carry no embedded id and are not already paired.
fn apply_fuzzy_fallback<'a>(
    matcher: &FuzzyMatcher,
    correlation: &mut Correlation<'a>,
    destinations: &'a [DestinationRecord],
) -> FallbackResult {
    let claimed: HashSet<&str> = correlation
        .existing_pairs
        .iter()
        .map(|(_, d)| d.id.as_str())
        .collect();
    let candidates: Vec<&DestinationRecord> = destinations
        .iter()
        .filter(|d| d.embedded_source_id().is_none() && !claimed.contains(d.id.as_str()))
        .collect();

    let outcome = matcher.match_meetings(&correlation.missing, &candidates);
    let pairs = outcome
        .matches
        .iter()
        .map(|m| FuzzyPairView {
            source_id: m.source.id.clone(),
            destination_id: m.destination.id.clone(),
            score: m.score,
            title_score: m.title_score,
            date_score: m.date_score,
        })
        .collect();

    correlation.missing = outcome.unmatched_source;
    correlation
        .existing_pairs
        .extend(outcome.matches.iter().map(|m| (m.source, m.destination)));

    FallbackResult {
        pairs,
        unmatched_destination: outcome
            .unmatched_destination
            .iter()
            .map(|d| d.id.clone())
            .collect(),
    }
}

/// Links of one kind that are desired but not yet present.
pub fn plan_missing_links(
    meeting_id: &str,
    kind: AssociationKind,
    desired: &BTreeSet<String>,
    existing: &BTreeSet<String>,
) -> Vec<AssociationLink> {
    desired
        .difference(existing)
        .map(|to_id| AssociationLink {
            meeting_id: meeting_id.to_string(),
            kind,
            to_id: to_id.clone(),
        })
        .collect()
}

pub struct Reconciler {
    source: Box<dyn SourceSystem>,
    destination: Box<dyn DestinationSystem>,
    settings: ReconcileSettings,
    transformer: RecordTransformer,
    snapshots: Option<SnapshotStore>,
}

impl Reconciler {
    pub fn new(
        source: Box<dyn SourceSystem>,
        destination: Box<dyn DestinationSystem>,
        settings: ReconcileSettings,
    ) -> Self {
        let transformer = RecordTransformer::new(settings.tuning.source_label.clone());
        Self {
            source,
            destination,
            settings,
            transformer,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    fn resolver(&self) -> AssociationResolver<'_> {
        AssociationResolver::new(
            self.destination.as_ref(),
            &self.settings.tuning.cross_reference_property,
            &self.settings.tuning.email_property,
            self.settings.call_delay,
        )
    }

    async fn pause(&self) {
        tokio::time::sleep(self.settings.call_delay).await;
    }

    async fn fetch_both(
        &self,
        window: &FetchWindow,
    ) -> Result<(crate::fetch::SourceFetch, Vec<DestinationRecord>)> {
        let source_fetcher = SourceFetcher::new(self.source.as_ref(), self.settings.page_delay);
        let target_fetcher =
            TargetFetcher::new(self.destination.as_ref(), self.settings.page_delay);
        tokio::try_join!(source_fetcher.fetch_all(window), target_fetcher.fetch_all())
            .context("fetching meeting listings")
    }

    /// Correlation plus fuzzy candidates, without writing anything.
    pub async fn preview_matches(&self, window: &FetchWindow) -> Result<MatchReport> {
        let (source_fetch, destinations) = self.fetch_both(window).await?;
        let mut correlation = correlate_with_prior(
            &source_fetch.admitted,
            &destinations,
            &BTreeMap::new(),
        );
        let identity_pairs = correlation.existing_pairs.len();
        let matcher = FuzzyMatcher::new(self.settings.tuning.matcher);
        let fallback = apply_fuzzy_fallback(&matcher, &mut correlation, &destinations);
        Ok(MatchReport {
            identity_pairs,
            fuzzy_pairs: fallback.pairs,
            unmatched_source: correlation.missing.iter().map(|s| s.id.clone()).collect(),
            unmatched_destination: fallback.unmatched_destination,
        })
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let run_key = SnapshotStore::run_key(started_at);
        let mode = if options.apply {
            RunMode::Apply
        } else {
            RunMode::DryRun
        };
        info!(%run_id, ?mode, "starting migration run");

        let (source_fetch, destinations) = self.fetch_both(&options.window).await?;

        let prior = match &self.snapshots {
            Some(store) => report::load_previous_mappings(store).await?,
            None => BTreeMap::new(),
        };
        let mut correlation =
            correlate_with_prior(&source_fetch.admitted, &destinations, &prior);

        let mut fuzzy_pairs = Vec::new();
        if options.fuzzy_fallback {
            let matcher = FuzzyMatcher::new(self.settings.tuning.matcher);
            fuzzy_pairs = apply_fuzzy_fallback(&matcher, &mut correlation, &destinations).pairs;
            for pair in &fuzzy_pairs {
                info!(
                    source_id = %pair.source_id,
                    destination_id = %pair.destination_id,
                    score = pair.score,
                    "fuzzy match"
                );
            }
        }

        let mut tally = RunTally {
            already_present: correlation.existing_pairs.len(),
            fuzzy_matched: fuzzy_pairs.len(),
            ..RunTally::default()
        };
        for rejection in &source_fetch.rejected {
            tally.skip(rejection.reason);
        }
        info!(
            missing = correlation.missing.len(),
            existing = correlation.existing_pairs.len(),
            rejected = source_fetch.rejected.len(),
            "correlated"
        );

        if let Some(store) = &self.snapshots {
            let plan = RunPlan {
                run_id,
                mode,
                window_since: options.window.since,
                window_cutoff: options.window.cutoff,
                creates: correlation
                    .missing
                    .iter()
                    .map(|s| PlannedCreate {
                        source_id: s.id.clone(),
                        title: s.title.clone(),
                        start: s.start,
                    })
                    .collect(),
                existing_pairs: correlation
                    .existing_pairs
                    .iter()
                    .map(|(s, d)| (s.id.clone(), d.id.clone()))
                    .collect(),
                fuzzy_pairs: fuzzy_pairs.clone(),
                rejected: source_fetch.rejected.clone(),
            };
            report::write_plan(store, &run_key, &plan).await?;
        }

        let mut cache = ResolutionCache::new();
        let mut created = BTreeMap::new();

        for record in &correlation.missing {
            self.create_missing(record, options.apply, &mut cache, &mut tally, &mut created)
                .await;
            log_progress(&tally);
        }

        for (source, destination) in &correlation.existing_pairs {
            self.fix_existing(source, destination, options.apply, &mut cache, &mut tally)
                .await;
            log_progress(&tally);
        }

        debug!(entries = cache.len(), hits = cache.hits(), "resolution cache");

        let mut summary = RunSummary {
            run_id,
            run_key: run_key.clone(),
            mode,
            started_at,
            finished_at: Utc::now(),
            source_system: self.source.system_name().to_string(),
            destination_system: self.destination.system_name().to_string(),
            fetched_source: source_fetch.admitted.len() + source_fetch.rejected.len(),
            fetched_destination: destinations.len(),
            tally,
            created,
            reports_dir: None,
        };

        if let Some(store) = &self.snapshots {
            let dir = report::write_run_outputs(store, &summary).await?;
            summary.reports_dir = Some(dir.display().to_string());
        }

        info!(
            processed = summary.tally.processed,
            created = summary.tally.created,
            skipped = summary.tally.skipped_total(),
            errors = summary.tally.errors,
            "run complete"
        );
        Ok(summary)
    }

    async fn create_missing(
        &self,
        record: &SourceRecord,
        apply: bool,
        cache: &mut ResolutionCache,
        tally: &mut RunTally,
        created: &mut BTreeMap<String, String>,
    ) {
        tally.processed += 1;
        let draft = match self.transformer.prepare(record) {
            Ok(draft) => draft,
            Err(TransformError::MissingField(field)) => {
                warn!(source_id = %record.id, field, "skipping record without required field");
                tally.skip(SkipReason::NoStartTime);
                return;
            }
        };
        let properties = draft.properties(self.settings.tuning.attendee_property.as_deref());

        let meeting_id = if apply {
            let result = self.destination.create_meeting(&properties).await;
            self.pause().await;
            match result {
                Ok(id) => {
                    info!(source_id = %record.id, destination_id = %id, "created meeting");
                    created.insert(record.id.clone(), id.clone());
                    id
                }
                Err(err) => {
                    warn!(
                        source_id = %record.id,
                        error = %err,
                        payload = err.payload().unwrap_or_default(),
                        "create failed"
                    );
                    tally.errors += 1;
                    return;
                }
            }
        } else {
            info!(
                source_id = %record.id,
                title = %draft.title,
                start = %draft.start,
                "dry run: would create meeting"
            );
            format!("<new:{}>", record.id)
        };
        tally.created += 1;

        let desired = self.resolver().resolve(record, cache).await;
        self.attach_missing(&meeting_id, &desired, &BTreeMap::new(), apply, tally)
            .await;
    }

    /// Reads current links, adds only the absent ones, and upgrades an
    /// untouched generated body with the participant roster.
    async fn fix_existing(
        &self,
        source: &SourceRecord,
        destination: &DestinationRecord,
        apply: bool,
        cache: &mut ResolutionCache,
        tally: &mut RunTally,
    ) {
        tally.processed += 1;

        let mut existing = BTreeMap::new();
        for kind in AssociationKind::ALL {
            let result = self.destination.list_associations(&destination.id, kind).await;
            self.pause().await;
            match result {
                Ok(ids) => {
                    existing.insert(kind, ids);
                }
                Err(err) if err.is_not_found() => {
                    debug!(destination_id = %destination.id, "destination meeting deleted; skipping");
                    tally.skip(SkipReason::DestinationDeleted);
                    return;
                }
                Err(err) => {
                    warn!(
                        destination_id = %destination.id,
                        error = %err,
                        payload = err.payload().unwrap_or_default(),
                        "reading associations failed"
                    );
                    tally.errors += 1;
                    return;
                }
            }
        }

        let desired = self.resolver().resolve(source, cache).await;
        self.attach_missing(&destination.id, &desired, &existing, apply, tally)
            .await;

        let Some(body) = destination.body.as_deref() else {
            return;
        };
        if !self.transformer.is_upgradable_body(body) {
            return;
        }
        let roster = roster_lines(&source.participants);
        if roster.is_empty() {
            return;
        }
        let new_body =
            self.transformer
                .compose_body(&source.id, source.description.as_deref(), &roster);
        if !apply {
            info!(destination_id = %destination.id, "dry run: would add participant roster to body");
            tally.bodies_upgraded += 1;
            return;
        }
        let properties = BTreeMap::from([(
            meetmig_adapters::hubspot::PROP_BODY.to_string(),
            new_body,
        )]);
        let result = self.destination.update_meeting(&destination.id, &properties).await;
        self.pause().await;
        match result {
            Ok(()) => tally.bodies_upgraded += 1,
            Err(err) => {
                warn!(
                    destination_id = %destination.id,
                    error = %err,
                    payload = err.payload().unwrap_or_default(),
                    "body update failed"
                );
                tally.errors += 1;
            }
        }
    }

    async fn attach_missing(
        &self,
        meeting_id: &str,
        desired: &ResolvedAssociations,
        existing: &BTreeMap<AssociationKind, BTreeSet<String>>,
        apply: bool,
        tally: &mut RunTally,
    ) {
        let empty = BTreeSet::new();
        for kind in AssociationKind::ALL {
            let current = existing.get(&kind).unwrap_or(&empty);
            let links = plan_missing_links(meeting_id, kind, desired.ids(kind), current);
            if links.is_empty() {
                continue;
            }
            if !apply {
                info!(meeting_id, ?kind, count = links.len(), "dry run: would add associations");
                tally.associations_added += links.len();
                continue;
            }

            let result = self.destination.create_associations(kind, &links).await;
            self.pause().await;
            match result {
                Ok(()) => tally.associations_added += links.len(),
                Err(err) => {
                    for link in &links {
                        warn!(
                            meeting_id,
                            ?kind,
                            to_id = %link.to_id,
                            error = %err,
                            "association failed"
                        );
                    }
                    tally.association_failures += links.len();
                }
            }
        }
    }
}

fn log_progress(tally: &RunTally) {
    info!(
        processed = tally.processed,
        created = tally.created,
        skipped = tally.skipped_total(),
        errors = tally.errors,
        "progress"
    );
}
