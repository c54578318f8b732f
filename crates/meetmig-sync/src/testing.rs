//! In-memory source and destination systems for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meetmig_adapters::{
    ApiError, DestinationPage, DestinationSystem, SourcePage, SourceSystem,
};
use meetmig_core::{AssociationKind, AssociationLink, DestinationRecord, ObjectType};
use meetmig_storage::FetchError;
use serde_json::{json, Value as JsonValue};

pub(crate) fn src_json(id: &str, start: &str, participants: JsonValue) -> JsonValue {
    json!({"id": id, "title": "Sync", "start": start, "participants": participants})
}

pub(crate) fn dst(id: &str, body: &str) -> DestinationRecord {
    DestinationRecord {
        id: id.to_string(),
        title: None,
        body: Some(body.to_string()),
        start: None,
        end: None,
    }
}

pub(crate) struct FakeSource {
    pages: Vec<Vec<JsonValue>>,
}

impl FakeSource {
    pub(crate) fn single_page(records: Vec<JsonValue>) -> Self {
        Self {
            pages: vec![records],
        }
    }
}

#[async_trait]
impl SourceSystem for FakeSource {
    fn system_name(&self) -> &'static str {
        "fake-source"
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<SourcePage, ApiError> {
        let idx: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        Ok(SourcePage {
            records: self.pages.get(idx).cloned().unwrap_or_default(),
            next_cursor: (idx + 1 < self.pages.len()).then(|| (idx + 1).to_string()),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub created: Vec<BTreeMap<String, String>>,
    pub updated: Vec<(String, BTreeMap<String, String>)>,
    pub searches: usize,
    pub association_batches: Vec<(AssociationKind, Vec<AssociationLink>)>,
}

pub(crate) struct FakeDestination {
    records: Vec<DestinationRecord>,
    lookups: HashMap<(ObjectType, String, String), String>,
    associations: HashMap<(String, AssociationKind), BTreeSet<String>>,
    deleted: HashSet<String>,
    failing_creates: HashSet<String>,
    failing_lookups: HashSet<String>,
    calls: Arc<Mutex<Calls>>,
}

fn http_error(status: u16) -> ApiError {
    ApiError::Fetch(FetchError::HttpStatus {
        status,
        url: "fake://destination".to_string(),
        body: String::new(),
    })
}

impl FakeDestination {
    pub(crate) fn new(records: Vec<DestinationRecord>) -> Self {
        Self {
            records,
            lookups: HashMap::new(),
            associations: HashMap::new(),
            deleted: HashSet::new(),
            failing_creates: HashSet::new(),
            failing_lookups: HashSet::new(),
            calls: Arc::default(),
        }
    }

    pub(crate) fn with_lookup(
        mut self,
        object_type: ObjectType,
        property: &str,
        value: &str,
        id: &str,
    ) -> Self {
        self.lookups.insert(
            (object_type, property.to_string(), value.to_string()),
            id.to_string(),
        );
        self
    }

    pub(crate) fn with_associations(
        mut self,
        meeting_id: &str,
        kind: AssociationKind,
        ids: &[&str],
    ) -> Self {
        self.associations.insert(
            (meeting_id.to_string(), kind),
            ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub(crate) fn with_deleted(mut self, meeting_id: &str) -> Self {
        self.deleted.insert(meeting_id.to_string());
        self
    }

    /// Creates whose body mentions `source_id` fail with a 400.
    pub(crate) fn with_failing_create(mut self, source_id: &str) -> Self {
        self.failing_creates.insert(source_id.to_string());
        self
    }

    pub(crate) fn with_failing_lookup(mut self, value: &str) -> Self {
        self.failing_lookups.insert(value.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Calls>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl DestinationSystem for FakeDestination {
    fn system_name(&self) -> &'static str {
        "fake-destination"
    }

    async fn list_page(&self, _after: Option<&str>) -> Result<DestinationPage, ApiError> {
        Ok(DestinationPage {
            records: self.records.clone(),
            next_after: None,
        })
    }

    async fn create_meeting(
        &self,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, ApiError> {
        let mut calls = self.calls.lock().unwrap();
        calls.created.push(properties.clone());
        let fails = self
            .failing_creates
            .iter()
            .any(|id| properties.values().any(|v| v.contains(id.as_str())));
        if fails {
            return Err(http_error(400));
        }
        Ok(format!("new-{}", calls.created.len()))
    }

    async fn update_meeting(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .updated
            .push((id.to_string(), properties.clone()));
        Ok(())
    }

    async fn search_one(
        &self,
        object_type: ObjectType,
        property: &str,
        value: &str,
    ) -> Result<Option<String>, ApiError> {
        self.calls.lock().unwrap().searches += 1;
        if self.failing_lookups.contains(value) {
            return Err(http_error(500));
        }
        Ok(self
            .lookups
            .get(&(object_type, property.to_string(), value.to_string()))
            .cloned())
    }

    async fn list_associations(
        &self,
        meeting_id: &str,
        kind: AssociationKind,
    ) -> Result<BTreeSet<String>, ApiError> {
        if self.deleted.contains(meeting_id) {
            return Err(http_error(404));
        }
        Ok(self
            .associations
            .get(&(meeting_id.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_associations(
        &self,
        kind: AssociationKind,
        links: &[AssociationLink],
    ) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .association_batches
            .push((kind, links.to_vec()));
        Ok(())
    }
}
