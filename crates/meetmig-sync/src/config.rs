use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Fuzzy matching weights and confidence floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub title_weight: f64,
    pub date_weight: f64,
    pub min_confidence: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            title_weight: 0.6,
            date_weight: 0.4,
            min_confidence: 0.6,
        }
    }
}

/// Optional `meetmig.yaml` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub matcher: MatcherConfig,
    /// Destination property holding the source system's record id.
    pub cross_reference_property: String,
    pub email_property: String,
    /// Destination meeting property that receives the `;`-joined attendee emails.
    pub attendee_property: Option<String>,
    pub source_label: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            cross_reference_property: "attio_record_id".to_string(),
            email_property: "email".to_string(),
            attendee_property: None,
            source_label: "Attio".to_string(),
        }
    }
}

impl Tuning {
    /// A missing file yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub attio_api_key: Option<String>,
    pub hubspot_access_token: Option<String>,
    pub attio_base_url: String,
    pub hubspot_base_url: String,
    pub reports_dir: PathBuf,
    pub lookback_days: i64,
    pub page_delay: Duration,
    pub call_delay: Duration,
    pub user_agent: String,
    pub tuning_path: PathBuf,
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

impl MigrateConfig {
    pub fn from_env() -> Self {
        Self {
            attio_api_key: std::env::var("ATTIO_API_KEY").ok().filter(|v| !v.is_empty()),
            hubspot_access_token: std::env::var("HUBSPOT_ACCESS_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            attio_base_url: std::env::var("ATTIO_BASE_URL")
                .unwrap_or_else(|_| meetmig_adapters::attio::DEFAULT_BASE_URL.to_string()),
            hubspot_base_url: std::env::var("HUBSPOT_BASE_URL")
                .unwrap_or_else(|_| meetmig_adapters::hubspot::DEFAULT_BASE_URL.to_string()),
            reports_dir: std::env::var("MEETMIG_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            lookback_days: std::env::var("MEETMIG_LOOKBACK_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            page_delay: env_millis("MEETMIG_PAGE_DELAY_MS", 300),
            call_delay: env_millis("MEETMIG_CALL_DELAY_MS", 250),
            user_agent: std::env::var("MEETMIG_USER_AGENT")
                .unwrap_or_else(|_| "meetmig/0.1".to_string()),
            tuning_path: std::env::var("MEETMIG_TUNING")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("meetmig.yaml")),
        }
    }

    pub fn attio_api_key(&self) -> Result<&str> {
        self.attio_api_key
            .as_deref()
            .context("ATTIO_API_KEY is not set")
    }

    pub fn hubspot_access_token(&self) -> Result<&str> {
        self.hubspot_access_token
            .as_deref()
            .context("HUBSPOT_ACCESS_TOKEN is not set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_tuning_file_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let tuning = Tuning::load(&dir.path().join("meetmig.yaml")).expect("defaults");
        assert_eq!(tuning, Tuning::default());
        assert_eq!(tuning.matcher.min_confidence, 0.6);
    }

    #[test]
    fn partial_tuning_file_keeps_other_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("meetmig.yaml");
        std::fs::write(
            &path,
            "matcher:\n  min_confidence: 0.75\nattendee_property: meeting_attendees\n",
        )
        .expect("write");

        let tuning = Tuning::load(&path).expect("tuning");
        assert_eq!(tuning.matcher.min_confidence, 0.75);
        assert_eq!(tuning.matcher.title_weight, 0.6);
        assert_eq!(tuning.attendee_property.as_deref(), Some("meeting_attendees"));
        assert_eq!(tuning.cross_reference_property, "attio_record_id");
    }

    #[test]
    fn invalid_tuning_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("meetmig.yaml");
        std::fs::write(&path, "matcher: [1, 2").expect("write");
        assert!(Tuning::load(&path).is_err());
    }
}
