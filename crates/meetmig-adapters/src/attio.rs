use async_trait::async_trait;
use meetmig_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{decode, ApiError, SourcePage, SourceSystem};

pub const DEFAULT_BASE_URL: &str = "https://api.attio.com";
const PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    data: Vec<JsonValue>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    data: JsonValue,
}

/// Client for the Attio v2 meetings API.
#[derive(Debug, Clone)]
pub struct AttioClient {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
}

impl AttioClient {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<JsonValue, ApiError> {
        let endpoint = format!("/v2/meetings/{meeting_id}");
        let value = self.http.get_json(&self.url(&endpoint), &self.api_key, &[]).await?;
        Ok(decode::<DataEnvelope>(&endpoint, value)?.data)
    }

    pub async fn call_recordings(&self, meeting_id: &str) -> Result<Vec<JsonValue>, ApiError> {
        let endpoint = format!("/v2/meetings/{meeting_id}/call_recordings");
        let value = self.http.get_json(&self.url(&endpoint), &self.api_key, &[]).await?;
        Ok(decode::<ListEnvelope>(&endpoint, value)?.data)
    }

    pub async fn transcript(
        &self,
        meeting_id: &str,
        recording_id: &str,
    ) -> Result<JsonValue, ApiError> {
        let endpoint =
            format!("/v2/meetings/{meeting_id}/call_recordings/{recording_id}/transcript");
        let value = self.http.get_json(&self.url(&endpoint), &self.api_key, &[]).await?;
        Ok(decode::<DataEnvelope>(&endpoint, value)?.data)
    }
}

#[async_trait]
impl SourceSystem for AttioClient {
    fn system_name(&self) -> &'static str {
        "Attio"
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<SourcePage, ApiError> {
        let endpoint = "/v2/meetings";
        let mut query = vec![("limit", PAGE_SIZE.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let value = self
            .http
            .get_json(&self.url(endpoint), &self.api_key, &query)
            .await?;
        let envelope: ListEnvelope = decode(endpoint, value)?;
        let next_cursor = envelope
            .pagination
            .and_then(|p| p.next_cursor)
            .filter(|c| !c.is_empty());
        debug!(count = envelope.data.len(), has_next = next_cursor.is_some(), "attio page");
        Ok(SourcePage {
            records: envelope.data,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetmig_storage::{BackoffPolicy, HttpClientConfig};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AttioClient {
        let http = HttpFetcher::new(HttpClientConfig {
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .expect("http");
        AttioClient::new(http, server.uri(), "attio-key")
    }

    #[tokio::test]
    async fn list_page_forwards_cursor_and_reads_next_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/meetings"))
            .and(query_param("cursor", "c1"))
            .and(header("authorization", "Bearer attio-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": {"meeting_id": "m2"}}],
                "pagination": {"next_cursor": null}
            })))
            .mount(&server)
            .await;

        let page = client(&server).list_page(Some("c1")).await.expect("page");
        assert_eq!(page.records.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn transcript_path_is_composite() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/meetings/m1/call_recordings/r1/transcript"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"raw_transcript": "hi"}})),
            )
            .mount(&server)
            .await;

        let transcript = client(&server).transcript("m1", "r1").await.expect("transcript");
        assert_eq!(transcript["raw_transcript"], "hi");
    }

    #[tokio::test]
    async fn malformed_listing_is_a_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/meetings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "nope"})))
            .mount(&server)
            .await;

        let err = client(&server).list_page(None).await.expect_err("shape");
        assert!(matches!(err, ApiError::Shape { .. }));
    }
}
