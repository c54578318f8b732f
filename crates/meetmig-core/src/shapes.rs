//! Known wire shapes for loosely typed meeting payloads, plus the ordered
//! extractor chains that normalize them.
//!
//! Each semantic value (start time, participants, linked records) can live in
//! several places and take several forms. The forms are modeled as untagged
//! enums with one normalizing function per family; the places are declared
//! once as an ordered chain of pure extractors where the first `Some` wins.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Epoch values above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Containers probed in order before falling back to top-level flat fields.
const CONTAINERS: [Option<&str>; 3] = [None, Some("values"), Some("attributes")];

/// A point in time as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeShape {
    Flat(String),
    Epoch(f64),
    Nested(NestedTime),
    /// Attribute-value arrays (`[{"value": ...}, ...]`); the first parseable entry wins.
    ValueList(Vec<TimeShape>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NestedTime {
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub timestamp: Option<EpochOrText>,
    #[serde(default)]
    pub value: Option<Box<TimeShape>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochOrText {
    Epoch(f64),
    Text(String),
}

impl TimeShape {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            TimeShape::Flat(text) => parse_time_text(text),
            TimeShape::Epoch(n) => from_epoch(*n),
            TimeShape::Nested(nested) => nested.resolve(),
            TimeShape::ValueList(items) => items.iter().find_map(TimeShape::resolve),
        }
    }
}

impl NestedTime {
    /// `datetime`, then `date`, then `timestamp`, then a wrapped `value`.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        self.datetime
            .as_deref()
            .and_then(parse_time_text)
            .or_else(|| self.date.as_deref().and_then(parse_time_text))
            .or_else(|| match &self.timestamp {
                Some(EpochOrText::Epoch(n)) => from_epoch(*n),
                Some(EpochOrText::Text(text)) => parse_time_text(text),
                None => None,
            })
            .or_else(|| self.value.as_deref().and_then(TimeShape::resolve))
    }
}

/// Parses RFC 3339, then naive date-times (as UTC), then bare dates (midnight UTC).
pub fn parse_time_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    if n > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n as i64)
    } else {
        DateTime::from_timestamp(n as i64, 0)
    }
}

fn time_at(value: &JsonValue) -> Option<DateTime<Utc>> {
    TimeShape::deserialize(value).ok()?.resolve()
}

fn container<'a>(record: &'a JsonValue, name: Option<&str>) -> Option<&'a JsonValue> {
    match name {
        None => Some(record),
        Some(name) => record.get(name).filter(|v| v.is_object()),
    }
}

/// Where a time value is looked up: the structured key probed inside each
/// container, then the flat keys probed at top level.
#[derive(Debug, Clone, Copy)]
pub struct TimeProbe {
    pub nested_key: &'static str,
    pub flat_keys: &'static [&'static str],
}

pub const START_PROBE: TimeProbe = TimeProbe {
    nested_key: "start",
    flat_keys: &["start_time", "start_at", "scheduled_at"],
};

pub const END_PROBE: TimeProbe = TimeProbe {
    nested_key: "end",
    flat_keys: &["end_time", "end_at"],
};

pub type TimeExtractor = fn(&JsonValue, &TimeProbe) -> Option<DateTime<Utc>>;

fn time_in_record(record: &JsonValue, probe: &TimeProbe) -> Option<DateTime<Utc>> {
    time_in_container(record, CONTAINERS[0], probe)
}

fn time_in_values(record: &JsonValue, probe: &TimeProbe) -> Option<DateTime<Utc>> {
    time_in_container(record, CONTAINERS[1], probe)
}

fn time_in_attributes(record: &JsonValue, probe: &TimeProbe) -> Option<DateTime<Utc>> {
    time_in_container(record, CONTAINERS[2], probe)
}

fn time_in_flat_fields(record: &JsonValue, probe: &TimeProbe) -> Option<DateTime<Utc>> {
    probe
        .flat_keys
        .iter()
        .find_map(|key| record.get(*key).and_then(time_at))
}

fn time_in_container(
    record: &JsonValue,
    name: Option<&str>,
    probe: &TimeProbe,
) -> Option<DateTime<Utc>> {
    container(record, name)?
        .get(probe.nested_key)
        .and_then(time_at)
}

/// Probe order for scheduled times. Declared once; callers never re-implement it.
pub const TIME_CHAIN: [TimeExtractor; 4] = [
    time_in_record,
    time_in_values,
    time_in_attributes,
    time_in_flat_fields,
];

pub fn extract_time(record: &JsonValue, probe: &TimeProbe) -> Option<DateTime<Utc>> {
    TIME_CHAIN.iter().find_map(|extract| extract(record, probe))
}

/// Identifier of a source record: a plain string or a composite object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdShape {
    Flat(String),
    Meeting { meeting_id: String },
    Record { record_id: String },
}

impl IdShape {
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            IdShape::Flat(id) => id,
            IdShape::Meeting { meeting_id } => meeting_id,
            IdShape::Record { record_id } => record_id,
        };
        let id = id.trim().to_string();
        (!id.is_empty()).then_some(id)
    }
}

pub fn extract_id(record: &JsonValue) -> Option<String> {
    IdShape::deserialize(record.get("id")?).ok()?.into_id()
}

/// Text fields may be plain strings or attribute-value arrays.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextShape {
    Flat(String),
    Wrapped { value: String },
    ValueList(Vec<TextShape>),
}

impl TextShape {
    pub fn resolve(self) -> Option<String> {
        let text = match self {
            TextShape::Flat(text) | TextShape::Wrapped { value: text } => text,
            TextShape::ValueList(items) => return items.into_iter().find_map(TextShape::resolve),
        };
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

pub fn extract_text(record: &JsonValue, keys: &[&str]) -> Option<String> {
    CONTAINERS.iter().find_map(|name| {
        let scope = container(record, *name)?;
        keys.iter().find_map(|key| {
            TextShape::deserialize(scope.get(*key)?)
                .ok()
                .and_then(TextShape::resolve)
        })
    })
}

/// A participant entry in its wire form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParticipant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_organizer: Option<bool>,
    #[serde(default)]
    pub person: Option<RecordPointer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordPointer {
    Flat(String),
    Nested { record_id: String },
}

impl RecordPointer {
    pub fn record_id(&self) -> &str {
        match self {
            RecordPointer::Flat(id) => id,
            RecordPointer::Nested { record_id } => record_id,
        }
    }
}

/// A linked-record entry in its wire form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLinkedRef {
    #[serde(default)]
    pub object_slug: Option<String>,
    #[serde(default)]
    pub target_object: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub target_record_id: Option<String>,
}

/// Entries of a list-valued field: objects are parsed, everything else is malformed.
#[derive(Debug, Clone)]
pub struct EntryList<T> {
    pub entries: Vec<T>,
    pub malformed: usize,
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            malformed: 0,
        }
    }
}

pub type ListExtractor = fn(&JsonValue) -> Option<&Vec<JsonValue>>;

fn participants_in_record(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("participants")?.as_array()
}

fn participants_in_values(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("values")?.get("participants")?.as_array()
}

fn participants_in_attributes(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("attributes")?.get("participants")?.as_array()
}

pub const PARTICIPANT_CHAIN: [ListExtractor; 3] = [
    participants_in_record,
    participants_in_values,
    participants_in_attributes,
];

fn linked_in_record(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("linked_records")?.as_array()
}

fn linked_in_values(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("values")?.get("linked_records")?.as_array()
}

fn linked_as_associations(record: &JsonValue) -> Option<&Vec<JsonValue>> {
    record.get("associations")?.as_array()
}

pub const LINKED_CHAIN: [ListExtractor; 3] =
    [linked_in_record, linked_in_values, linked_as_associations];

pub fn extract_entries<T>(record: &JsonValue, chain: &[ListExtractor]) -> EntryList<T>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(items) = chain.iter().find_map(|extract| extract(record)) else {
        return EntryList::default();
    };
    let mut out = EntryList::default();
    for item in items {
        match item.is_object().then(|| T::deserialize(item).ok()).flatten() {
            Some(entry) => out.entries.push(entry),
            None => out.malformed += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn nested_datetime_wins_over_date() {
        let rec = json!({"start": {"datetime": "2025-03-04T10:00:00Z", "date": "2025-01-01"}});
        assert_eq!(extract_time(&rec, &START_PROBE), Some(ts("2025-03-04T10:00:00Z")));
    }

    #[test]
    fn flat_string_and_timestamp_shapes_resolve() {
        let flat = json!({"start": "2025-03-04T10:00:00+02:00"});
        assert_eq!(extract_time(&flat, &START_PROBE), Some(ts("2025-03-04T08:00:00Z")));

        let stamp = json!({"start": {"timestamp": 1_741_082_400_000_i64}});
        assert_eq!(extract_time(&stamp, &START_PROBE), Some(ts("2025-03-04T10:00:00Z")));
    }

    #[test]
    fn record_container_is_probed_before_values_and_attributes() {
        let rec = json!({
            "values": {"start": "2025-02-01"},
            "attributes": {"start": "2025-03-01"},
        });
        assert_eq!(extract_time(&rec, &START_PROBE), Some(ts("2025-02-01T00:00:00Z")));

        let rec = json!({"attributes": {"start": {"date": "2025-03-01"}}, "start_time": "2025-04-01"});
        assert_eq!(extract_time(&rec, &START_PROBE), Some(ts("2025-03-01T00:00:00Z")));
    }

    #[test]
    fn top_level_flat_fields_are_last_resort() {
        let rec = json!({"start_time": "2025-04-01T09:30:00"});
        assert_eq!(extract_time(&rec, &START_PROBE), Some(ts("2025-04-01T09:30:00Z")));
    }

    #[test]
    fn attribute_value_arrays_resolve() {
        let rec = json!({"values": {"start": [{"value": "2025-05-05T12:00:00Z"}]}});
        assert_eq!(extract_time(&rec, &START_PROBE), Some(ts("2025-05-05T12:00:00Z")));
    }

    #[test]
    fn unparseable_or_absent_time_is_none() {
        assert_eq!(extract_time(&json!({"start": "soon"}), &START_PROBE), None);
        assert_eq!(extract_time(&json!({"created_at": "2025-01-01"}), &START_PROBE), None);
        assert_eq!(extract_time(&json!({"start": {}}), &START_PROBE), None);
    }

    #[test]
    fn composite_and_flat_ids() {
        assert_eq!(
            extract_id(&json!({"id": {"workspace_id": "w", "meeting_id": "m-1"}})),
            Some("m-1".to_string())
        );
        assert_eq!(extract_id(&json!({"id": "abc"})), Some("abc".to_string()));
        assert_eq!(extract_id(&json!({"id": ""})), None);
        assert_eq!(extract_id(&json!({})), None);
    }

    #[test]
    fn non_object_entries_are_counted_as_malformed() {
        let rec = json!({"participants": [{"email_address": "a@x.com"}, "bogus", 7, {"name": "B"}]});
        let list: EntryList<RawParticipant> = extract_entries(&rec, &PARTICIPANT_CHAIN);
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.malformed, 2);
    }

    #[test]
    fn text_shapes_unwrap_values() {
        let rec = json!({"values": {"title": [{"value": "  Kickoff "}]}});
        assert_eq!(extract_text(&rec, &["title"]), Some("Kickoff".to_string()));
        assert_eq!(extract_text(&json!({"title": "   "}), &["title"]), None);
    }
}
