use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meetmig_core::shapes::parse_time_text;
use meetmig_core::{AssociationKind, AssociationLink, DestinationRecord, ObjectType};
use meetmig_storage::HttpFetcher;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{decode, ApiError, DestinationPage, DestinationSystem};

pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
const PAGE_SIZE: usize = 100;

pub const PROP_TIMESTAMP: &str = "hs_timestamp";
pub const PROP_TITLE: &str = "hs_meeting_title";
pub const PROP_BODY: &str = "hs_meeting_body";
pub const PROP_START: &str = "hs_meeting_start_time";
pub const PROP_END: &str = "hs_meeting_end_time";
pub const PROP_OUTCOME: &str = "hs_meeting_outcome";

const LISTED_PROPERTIES: [&str; 5] = [PROP_TITLE, PROP_BODY, PROP_START, PROP_END, PROP_TIMESTAMP];

#[derive(Debug, Deserialize)]
struct ObjectPage {
    #[serde(default)]
    results: Vec<HubSpotObject>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<PagingNext>,
}

#[derive(Debug, Deserialize)]
struct PagingNext {
    after: String,
}

#[derive(Debug, Deserialize)]
struct HubSpotObject {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<HubSpotObject>,
}

#[derive(Debug, Deserialize)]
struct AssociationPage {
    #[serde(default)]
    results: Vec<AssociatedObject>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociatedObject {
    to_object_id: IdValue,
}

/// Object ids arrive as strings from v3 endpoints and as numbers from v4 ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(u64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Text(s) => s,
            IdValue::Number(n) => n.to_string(),
        }
    }
}

/// Client for the HubSpot CRM objects, search and associations APIs.
#[derive(Debug, Clone)]
pub struct HubSpotClient {
    http: HttpFetcher,
    base_url: String,
    token: String,
}

impl HubSpotClient {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn parse_hubspot_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    parse_time_text(value).or_else(|| {
        value
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    })
}

fn to_destination_record(object: HubSpotObject) -> DestinationRecord {
    let prop = |name: &str| {
        object
            .properties
            .get(name)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.is_empty())
    };
    DestinationRecord {
        title: prop(PROP_TITLE).map(ToString::to_string),
        body: prop(PROP_BODY).map(ToString::to_string),
        start: parse_hubspot_time(prop(PROP_START)).or_else(|| parse_hubspot_time(prop(PROP_TIMESTAMP))),
        end: parse_hubspot_time(prop(PROP_END)),
        id: object.id.clone(),
    }
}

#[async_trait]
impl DestinationSystem for HubSpotClient {
    fn system_name(&self) -> &'static str {
        "HubSpot"
    }

    async fn list_page(&self, after: Option<&str>) -> Result<DestinationPage, ApiError> {
        let endpoint = "/crm/v3/objects/meetings";
        let mut query = vec![
            ("limit", PAGE_SIZE.to_string()),
            ("properties", LISTED_PROPERTIES.join(",")),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let value = self.http.get_json(&self.url(endpoint), &self.token, &query).await?;
        let page: ObjectPage = decode(endpoint, value)?;
        let next_after = page.paging.and_then(|p| p.next).map(|n| n.after);
        debug!(count = page.results.len(), has_next = next_after.is_some(), "hubspot page");
        Ok(DestinationPage {
            records: page.results.into_iter().map(to_destination_record).collect(),
            next_after,
        })
    }

    async fn create_meeting(
        &self,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, ApiError> {
        let endpoint = "/crm/v3/objects/meetings";
        let value = self
            .http
            .send_json(
                Method::POST,
                &self.url(endpoint),
                &self.token,
                &json!({ "properties": properties }),
            )
            .await?;
        let created: HubSpotObject = decode(endpoint, value)?;
        Ok(created.id)
    }

    async fn update_meeting(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let endpoint = format!("/crm/v3/objects/meetings/{id}");
        self.http
            .send_json(
                Method::PATCH,
                &self.url(&endpoint),
                &self.token,
                &json!({ "properties": properties }),
            )
            .await?;
        Ok(())
    }

    async fn search_one(
        &self,
        object_type: ObjectType,
        property: &str,
        value: &str,
    ) -> Result<Option<String>, ApiError> {
        let endpoint = format!("/crm/v3/objects/{object_type}/search");
        let body = json!({
            "filterGroups": [{
                "filters": [{"propertyName": property, "operator": "EQ", "value": value}]
            }],
            "properties": ["hs_object_id"],
            "limit": 1,
        });
        let response = self.http.query_json(&self.url(&endpoint), &self.token, &body).await?;
        let results: SearchResults = decode(&endpoint, response)?;
        Ok(results.results.into_iter().next().map(|o| o.id))
    }

    async fn list_associations(
        &self,
        meeting_id: &str,
        kind: AssociationKind,
    ) -> Result<BTreeSet<String>, ApiError> {
        let endpoint = format!(
            "/crm/v4/objects/meetings/{meeting_id}/associations/{}",
            kind.object_type()
        );
        let mut ids = BTreeSet::new();
        let mut after: Option<String> = None;
        loop {
            let mut query = vec![("limit", "500".to_string())];
            if let Some(after) = &after {
                query.push(("after", after.clone()));
            }
            let value = self.http.get_json(&self.url(&endpoint), &self.token, &query).await?;
            let page: AssociationPage = decode(&endpoint, value)?;
            ids.extend(page.results.into_iter().map(|r| r.to_object_id.into_string()));
            match page.paging.and_then(|p| p.next) {
                Some(next) => after = Some(next.after),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn create_associations(
        &self,
        kind: AssociationKind,
        links: &[AssociationLink],
    ) -> Result<(), ApiError> {
        if links.is_empty() {
            return Ok(());
        }
        let endpoint = format!(
            "/crm/v3/associations/{}/{}/batch/create",
            ObjectType::Meetings,
            kind.object_type()
        );
        let inputs: Vec<JsonValue> = links
            .iter()
            .map(|link| {
                json!({
                    "from": {"id": link.meeting_id},
                    "to": {"id": link.to_id},
                    "type": kind.type_label(),
                })
            })
            .collect();
        let response = self
            .http
            .send_json(
                Method::POST,
                &self.url(&endpoint),
                &self.token,
                &json!({ "inputs": inputs }),
            )
            .await?;
        let has_errors = response
            .get("errors")
            .and_then(JsonValue::as_array)
            .is_some_and(|errors| !errors.is_empty());
        if has_errors {
            return Err(ApiError::Rejected {
                endpoint,
                payload: response.to_string(),
            });
        }
        Ok(())
    }
}
