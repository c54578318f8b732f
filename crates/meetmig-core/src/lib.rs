//! Core domain model for meeting migration between the two CRMs.

pub mod shapes;

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::shapes::{
    extract_entries, extract_id, extract_text, extract_time, RawLinkedRef, RawParticipant,
    END_PROBE, LINKED_CHAIN, PARTICIPANT_CHAIN, START_PROBE,
};

pub const CRATE_NAME: &str = "meetmig-core";

/// Prefix of every body this tool writes into the destination system.
pub const IMPORT_HEADER_PREFIX: &str = "Imported from";
/// Placeholder used when the source record has no description.
pub const NO_DESCRIPTION: &str = "No description";
/// Marker preceding the embedded source identifier in destination bodies.
pub const ORIGINAL_ID_MARKER: &str = "Original ID:";
pub const PARTICIPANTS_HEADING: &str = "Participants:";

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("record has no recognizable identifier")]
    MissingIdentifier,
}

/// One attendee of a source meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: Option<String>,
    pub email: Option<String>,
    pub status: Option<String>,
    pub is_organizer: bool,
    /// Source-side person record this attendee is explicitly linked to.
    pub person_record_id: Option<String>,
}

impl Participant {
    fn from_raw(raw: RawParticipant) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            name: clean(raw.name).or_else(|| clean(raw.full_name)),
            email: clean(raw.email_address).or_else(|| clean(raw.email)),
            status: clean(raw.status),
            is_organizer: raw.is_organizer.unwrap_or(false),
            person_record_id: raw
                .person
                .map(|p| p.record_id().trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /// Email if it is syntactically usable as an address.
    pub fn valid_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| e.contains('@'))
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.email.as_deref())
    }
}

/// Entity family a linked reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Company,
    Deal,
    Other,
}

impl EntityKind {
    pub fn from_slug(slug: &str) -> Self {
        match slug.trim().to_ascii_lowercase().as_str() {
            "person" | "people" => EntityKind::Person,
            "company" | "companies" => EntityKind::Company,
            "deal" | "deals" => EntityKind::Deal,
            _ => EntityKind::Other,
        }
    }
}

/// A source record's link to another source entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedRef {
    pub kind: EntityKind,
    pub slug: String,
    pub record_id: String,
}

impl LinkedRef {
    fn from_raw(raw: RawLinkedRef) -> Option<Self> {
        let slug = raw.object_slug.or(raw.target_object).or(raw.kind)?;
        let record_id = raw.record_id.or(raw.target_record_id)?;
        let record_id = record_id.trim().to_string();
        if record_id.is_empty() {
            return None;
        }
        Some(Self {
            kind: EntityKind::from_slug(&slug),
            slug,
            record_id,
        })
    }
}

/// Normalized snapshot of one meeting in the source system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
    pub linked: Vec<LinkedRef>,
    /// Participant or linked-record entries that could not be parsed.
    pub malformed_entries: usize,
    #[serde(skip)]
    pub raw: JsonValue,
}

impl SourceRecord {
    pub fn from_json(raw: JsonValue) -> Result<Self, ShapeError> {
        let id = extract_id(&raw).ok_or(ShapeError::MissingIdentifier)?;
        let participants = extract_entries::<RawParticipant>(&raw, &PARTICIPANT_CHAIN);
        let linked = extract_entries::<RawLinkedRef>(&raw, &LINKED_CHAIN);
        let linked_total = linked.entries.len();
        let linked_refs: Vec<LinkedRef> = linked
            .entries
            .into_iter()
            .filter_map(LinkedRef::from_raw)
            .collect();
        let malformed_entries =
            participants.malformed + linked.malformed + (linked_total - linked_refs.len());

        Ok(Self {
            title: extract_text(&raw, &["title", "name"]),
            description: extract_text(&raw, &["description"]),
            start: extract_time(&raw, &START_PROBE),
            end: extract_time(&raw, &END_PROBE),
            participants: participants
                .entries
                .into_iter()
                .map(Participant::from_raw)
                .collect(),
            linked: linked_refs,
            malformed_entries,
            id,
            raw,
        })
    }
}

/// A meeting as it currently exists in the destination system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DestinationRecord {
    pub fn embedded_source_id(&self) -> Option<&str> {
        self.body.as_deref().and_then(embedded_source_id)
    }
}

fn original_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Original ID: ([A-Za-z0-9-]{36})").expect("static pattern compiles")
    })
}

/// Recovers the source identifier written into a destination body.
pub fn embedded_source_id(body: &str) -> Option<&str> {
    original_id_pattern()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Destination object families that meetings associate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    Contact,
    Company,
    Deal,
}

impl AssociationKind {
    pub const ALL: [AssociationKind; 3] = [
        AssociationKind::Contact,
        AssociationKind::Company,
        AssociationKind::Deal,
    ];

    pub fn object_type(self) -> ObjectType {
        match self {
            AssociationKind::Contact => ObjectType::Contacts,
            AssociationKind::Company => ObjectType::Companies,
            AssociationKind::Deal => ObjectType::Deals,
        }
    }

    /// Association label submitted with each link.
    pub fn type_label(self) -> &'static str {
        match self {
            AssociationKind::Contact => "meeting_event_to_contact",
            AssociationKind::Company => "meeting_event_to_company",
            AssociationKind::Deal => "meeting_event_to_deal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Meetings,
    Contacts,
    Companies,
    Deals,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Meetings => "meetings",
            ObjectType::Contacts => "contacts",
            ObjectType::Companies => "companies",
            ObjectType::Deals => "deals",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge from a destination meeting to a contact, company or deal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationLink {
    pub meeting_id: String,
    pub kind: AssociationKind,
    pub to_id: String,
}

impl AssociationLink {
    pub fn from_type(&self) -> ObjectType {
        ObjectType::Meetings
    }

    pub fn to_type(&self) -> ObjectType {
        self.kind.object_type()
    }
}
