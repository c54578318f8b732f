//! Remote system contracts + the Attio (source) and HubSpot (destination) clients.

pub mod attio;
pub mod hubspot;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use meetmig_core::{AssociationKind, AssociationLink, DestinationRecord, ObjectType};
use meetmig_storage::FetchError;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use attio::AttioClient;
pub use hubspot::HubSpotClient;

pub const CRATE_NAME: &str = "meetmig-adapters";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected {endpoint} response: {message}")]
    Shape { endpoint: String, message: String },
    #[error("{endpoint} rejected the request: {payload}")]
    Rejected { endpoint: String, payload: String },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Fetch(err) if err.is_not_found())
    }

    /// Response payload worth logging alongside the failure, when there is one.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ApiError::Fetch(FetchError::HttpStatus { body, .. }) => Some(body),
            ApiError::Rejected { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(endpoint: &str, value: JsonValue) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Shape {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

/// One page of raw source records plus the opaque cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<JsonValue>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DestinationPage {
    pub records: Vec<DestinationRecord>,
    pub next_after: Option<String>,
}

/// The system meetings are migrated away from. Read-only.
#[async_trait]
pub trait SourceSystem: Send + Sync {
    fn system_name(&self) -> &'static str;

    async fn list_page(&self, cursor: Option<&str>) -> Result<SourcePage, ApiError>;
}

/// The system meetings are migrated into.
#[async_trait]
pub trait DestinationSystem: Send + Sync {
    fn system_name(&self) -> &'static str;

    async fn list_page(&self, after: Option<&str>) -> Result<DestinationPage, ApiError>;

    /// Creates a meeting from a property bag and returns its new id.
    async fn create_meeting(&self, properties: &BTreeMap<String, String>)
        -> Result<String, ApiError>;

    async fn update_meeting(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), ApiError>;

    /// Exact-match lookup; returns the first hit only.
    async fn search_one(
        &self,
        object_type: ObjectType,
        property: &str,
        value: &str,
    ) -> Result<Option<String>, ApiError>;

    /// Ids currently linked to `meeting_id` for one association kind.
    async fn list_associations(
        &self,
        meeting_id: &str,
        kind: AssociationKind,
    ) -> Result<BTreeSet<String>, ApiError>;

    /// Submits links of a single kind in one batch.
    async fn create_associations(
        &self,
        kind: AssociationKind,
        links: &[AssociationLink],
    ) -> Result<(), ApiError>;
}
