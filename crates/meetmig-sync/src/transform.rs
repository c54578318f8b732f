//! Source meeting -> destination property bag.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use meetmig_adapters::hubspot::{
    PROP_BODY, PROP_END, PROP_OUTCOME, PROP_START, PROP_TIMESTAMP, PROP_TITLE,
};
use meetmig_core::{
    Participant, SourceRecord, IMPORT_HEADER_PREFIX, NO_DESCRIPTION, ORIGINAL_ID_MARKER,
    PARTICIPANTS_HEADING,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_TITLE: &str = "Imported meeting";
/// Bodies at least this long are treated as hand-edited.
pub const EDITED_BODY_MIN_LEN: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationDraft {
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `;`-joined participant emails.
    pub attendees: String,
    pub roster: Vec<String>,
}

impl DestinationDraft {
    pub fn properties(&self, attendee_property: Option<&str>) -> BTreeMap<String, String> {
        let stamp = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut props = BTreeMap::from([
            (PROP_TIMESTAMP.to_string(), stamp(&self.start)),
            (PROP_TITLE.to_string(), self.title.clone()),
            (PROP_BODY.to_string(), self.body.clone()),
            (PROP_START.to_string(), stamp(&self.start)),
            (PROP_END.to_string(), stamp(&self.end)),
            (PROP_OUTCOME.to_string(), "COMPLETED".to_string()),
        ]);
        if let Some(property) = attendee_property {
            if !self.attendees.is_empty() {
                props.insert(property.to_string(), self.attendees.clone());
            }
        }
        props
    }
}

pub struct RecordTransformer {
    source_label: String,
}

impl RecordTransformer {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
        }
    }

    pub fn header(&self) -> String {
        format!("{IMPORT_HEADER_PREFIX} {}", self.source_label)
    }

    pub fn prepare(&self, record: &SourceRecord) -> Result<DestinationDraft, TransformError> {
        let start = record.start.ok_or(TransformError::MissingField("start_time"))?;
        let end = record
            .end
            .filter(|end| *end > start)
            .unwrap_or(start + Duration::hours(1));

        if record.malformed_entries > 0 {
            warn!(
                source_id = %record.id,
                malformed = record.malformed_entries,
                "ignoring malformed participant or linked-record entries"
            );
        }

        let roster = roster_lines(&record.participants);
        let attendees = record
            .participants
            .iter()
            .filter_map(Participant::valid_email)
            .collect::<Vec<_>>()
            .join(";");

        Ok(DestinationDraft {
            source_id: record.id.clone(),
            title: record
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: self.compose_body(&record.id, record.description.as_deref(), &roster),
            start,
            end,
            attendees,
            roster,
        })
    }

    pub fn compose_body(&self, source_id: &str, description: Option<&str>, roster: &[String]) -> String {
        let mut body = format!(
            "{}. {ORIGINAL_ID_MARKER} {source_id}\n\n{}",
            self.header(),
            description.unwrap_or(NO_DESCRIPTION)
        );
        if !roster.is_empty() {
            body.push_str("\n\n");
            body.push_str(PARTICIPANTS_HEADING);
            for line in roster {
                body.push('\n');
                body.push_str(line);
            }
        }
        body
    }

    /// True only for bodies this tool wrote and nobody has meaningfully edited.
    pub fn is_upgradable_body(&self, body: &str) -> bool {
        body.starts_with(&self.header())
            && !body.contains(PARTICIPANTS_HEADING)
            && (body.contains(NO_DESCRIPTION) || body.chars().count() < EDITED_BODY_MIN_LEN)
    }
}

pub fn roster_lines(participants: &[Participant]) -> Vec<String> {
    participants
        .iter()
        .filter_map(|p| {
            let mut line = format!("- {}", p.display_name()?);
            if p.is_organizer {
                line.push_str(" (Organizer)");
            }
            if let Some(status) = &p.status {
                line.push_str(&format!(" [{status}]"));
            }
            Some(line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value as JsonValue;

    fn participant(name: Option<&str>, email: Option<&str>) -> Participant {
        Participant {
            name: name.map(Into::into),
            email: email.map(Into::into),
            status: None,
            is_organizer: false,
            person_record_id: None,
        }
    }

    fn record(start: Option<DateTime<Utc>>) -> SourceRecord {
        SourceRecord {
            id: "11111111-1111-1111-1111-111111111111".into(),
            title: None,
            description: None,
            start,
            end: None,
            participants: vec![
                Participant {
                    status: Some("accepted".into()),
                    is_organizer: true,
                    ..participant(Some("Ana"), Some("ana@acme.io"))
                },
                participant(None, Some("bob@acme.io")),
                participant(None, Some("not-an-email")),
            ],
            linked: vec![],
            malformed_entries: 1,
            raw: JsonValue::Null,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).single().unwrap()
    }

    #[test]
    fn missing_start_is_a_missing_field_error() {
        let err = RecordTransformer::new("Attio").prepare(&record(None)).unwrap_err();
        assert_eq!(err, TransformError::MissingField("start_time"));
    }

    #[test]
    fn draft_defaults_title_end_and_builds_body() {
        let draft = RecordTransformer::new("Attio")
            .prepare(&record(Some(start())))
            .expect("draft");
        assert_eq!(draft.title, DEFAULT_TITLE);
        assert_eq!(draft.end, start() + Duration::hours(1));
        assert_eq!(draft.attendees, "ana@acme.io;bob@acme.io");
        assert_eq!(
            draft.body,
            "Imported from Attio. Original ID: 11111111-1111-1111-1111-111111111111\n\n\
             No description\n\n\
             Participants:\n\
             - Ana (Organizer) [accepted]\n\
             - bob@acme.io\n\
             - not-an-email"
        );
    }

    #[test]
    fn end_before_start_is_replaced() {
        let mut rec = record(Some(start()));
        rec.end = Some(start() - Duration::minutes(5));
        let draft = RecordTransformer::new("Attio").prepare(&rec).expect("draft");
        assert_eq!(draft.end, start() + Duration::hours(1));

        rec.end = Some(start() + Duration::minutes(30));
        let draft = RecordTransformer::new("Attio").prepare(&rec).expect("draft");
        assert_eq!(draft.end, start() + Duration::minutes(30));
    }

    #[test]
    fn properties_include_attendees_only_when_configured() {
        let draft = RecordTransformer::new("Attio")
            .prepare(&record(Some(start())))
            .expect("draft");
        let plain = draft.properties(None);
        assert_eq!(plain.get(PROP_START).map(String::as_str), Some("2025-06-01T15:00:00.000Z"));
        assert_eq!(plain.get(PROP_OUTCOME).map(String::as_str), Some("COMPLETED"));
        assert!(!plain.contains_key("meeting_attendees"));

        let with = draft.properties(Some("meeting_attendees"));
        assert_eq!(
            with.get("meeting_attendees").map(String::as_str),
            Some("ana@acme.io;bob@acme.io")
        );
    }

    #[test]
    fn upgrade_heuristic_protects_edited_bodies() {
        let t = RecordTransformer::new("Attio");
        let generated = "Imported from Attio. Original ID: x\n\nNo description";
        assert!(t.is_upgradable_body(generated));

        let short_generated = "Imported from Attio. Original ID: x\n\nQuick call";
        assert!(t.is_upgradable_body(short_generated));

        let long_edited = format!("Imported from Attio. Original ID: x\n\n{}", "notes ".repeat(100));
        assert!(!t.is_upgradable_body(&long_edited));

        assert!(!t.is_upgradable_body("My own notes. No description"));
        assert!(!t.is_upgradable_body(
            "Imported from Attio. Original ID: x\n\nNo description\n\nParticipants:\n- a"
        ));
    }
}
