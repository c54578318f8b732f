//! Paginated listing of both systems, with source-side admissibility filtering.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use meetmig_adapters::{ApiError, DestinationSystem, SourceSystem};
use meetmig_core::{DestinationRecord, SourceRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Why a source record was not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingIdentifier,
    NoStartTime,
    ScheduledAfterCutoff,
    ImplausibleDate,
    BeforeWindow,
    DestinationDeleted,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingIdentifier => "missing_identifier",
            SkipReason::NoStartTime => "no_start_time",
            SkipReason::ScheduledAfterCutoff => "scheduled_after_cutoff",
            SkipReason::ImplausibleDate => "implausible_date",
            SkipReason::BeforeWindow => "before_window",
            SkipReason::DestinationDeleted => "destination_deleted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub source_id: Option<String>,
    pub reason: SkipReason,
}

/// Time bounds a source record's start must fall within.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub since: Option<DateTime<Utc>>,
    pub cutoff: DateTime<Utc>,
    pub invoked_at: DateTime<Utc>,
}

impl FetchWindow {
    pub fn up_to(cutoff: DateTime<Utc>) -> Self {
        Self {
            since: None,
            cutoff,
            invoked_at: cutoff,
        }
    }

    pub fn admit(&self, start: Option<DateTime<Utc>>) -> Result<DateTime<Utc>, SkipReason> {
        let start = start.ok_or(SkipReason::NoStartTime)?;
        if start.year() > self.invoked_at.year() + 1 {
            return Err(SkipReason::ImplausibleDate);
        }
        if start > self.cutoff {
            return Err(SkipReason::ScheduledAfterCutoff);
        }
        if self.since.is_some_and(|since| start < since) {
            return Err(SkipReason::BeforeWindow);
        }
        Ok(start)
    }
}

#[derive(Debug, Default)]
pub struct SourceFetch {
    pub admitted: Vec<SourceRecord>,
    pub rejected: Vec<Rejection>,
    pub pages: usize,
}

pub struct SourceFetcher<'a> {
    system: &'a dyn SourceSystem,
    page_delay: Duration,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(system: &'a dyn SourceSystem, page_delay: Duration) -> Self {
        Self { system, page_delay }
    }

    pub async fn fetch_all(&self, window: &FetchWindow) -> Result<SourceFetch, ApiError> {
        let mut out = SourceFetch::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.system.list_page(cursor.as_deref()).await?;
            out.pages += 1;

            for raw in page.records {
                let record = match SourceRecord::from_json(raw) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(error = %err, "skipping source record");
                        out.rejected.push(Rejection {
                            source_id: None,
                            reason: SkipReason::MissingIdentifier,
                        });
                        continue;
                    }
                };

                match window.admit(record.start) {
                    Ok(_) => out.admitted.push(record),
                    Err(reason) => {
                        match reason {
                            SkipReason::BeforeWindow => {
                                debug!(source_id = %record.id, %reason, "outside requested window")
                            }
                            _ => warn!(
                                source_id = %record.id,
                                start = ?record.start,
                                %reason,
                                "rejecting source record"
                            ),
                        }
                        out.rejected.push(Rejection {
                            source_id: Some(record.id),
                            reason,
                        });
                    }
                }
            }

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(cursor = %next, "source returned the same cursor twice; stopping");
                    break;
                }
                Some(next) => {
                    cursor = Some(next);
                    tokio::time::sleep(self.page_delay).await;
                }
                None => break,
            }
        }

        info!(
            system = self.system.system_name(),
            pages = out.pages,
            admitted = out.admitted.len(),
            rejected = out.rejected.len(),
            "fetched source records"
        );
        Ok(out)
    }
}

pub struct TargetFetcher<'a> {
    system: &'a dyn DestinationSystem,
    page_delay: Duration,
}

impl<'a> TargetFetcher<'a> {
    pub fn new(system: &'a dyn DestinationSystem, page_delay: Duration) -> Self {
        Self { system, page_delay }
    }

    pub async fn fetch_all(&self) -> Result<Vec<DestinationRecord>, ApiError> {
        let mut records = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.system.list_page(after.as_deref()).await?;
            records.extend(page.records);
            match page.next_after {
                Some(next) if after.as_deref() == Some(next.as_str()) => {
                    warn!(after = %next, "destination returned the same cursor twice; stopping");
                    break;
                }
                Some(next) => {
                    after = Some(next);
                    tokio::time::sleep(self.page_delay).await;
                }
                None => break,
            }
        }

        info!(
            system = self.system.system_name(),
            count = records.len(),
            "fetched destination records"
        );
        Ok(records)
    }
}
