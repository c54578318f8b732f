//! Run snapshot storage + HTTP fetch utilities for meetmig.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "meetmig-storage";

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub name: String,
    pub content_hash: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub run: String,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Per-run JSON snapshots under `<root>/<YYYYmmdd_HHMMSS>/`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn run_key(started_at: DateTime<Utc>) -> String {
        started_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn run_dir(&self, run: &str) -> PathBuf {
        self.root.join(run)
    }

    pub async fn write_json<T: Serialize>(
        &self,
        run: &str,
        name: &str,
        value: &T,
    ) -> anyhow::Result<StoredSnapshot> {
        let bytes =
            serde_json::to_vec_pretty(value).with_context(|| format!("serializing {name}"))?;
        self.store_bytes(run, name, &bytes).await
    }

    pub async fn write_text(
        &self,
        run: &str,
        name: &str,
        text: &str,
    ) -> anyhow::Result<StoredSnapshot> {
        self.store_bytes(run, name, text.as_bytes()).await
    }

    /// Write bytes via a temp file and atomic rename so readers never see partial files.
    pub async fn store_bytes(
        &self,
        run: &str,
        name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredSnapshot> {
        let run_dir = self.run_dir(run);
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating snapshot directory {}", run_dir.display()))?;

        let absolute_path = run_dir.join(name);
        let temp_path = run_dir.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp snapshot file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredSnapshot {
            name: name.to_string(),
            content_hash: Self::sha256_hex(bytes),
            absolute_path,
            byte_size: bytes.len(),
        })
    }

    pub async fn read_json<T: DeserializeOwned>(&self, run: &str, name: &str) -> anyhow::Result<T> {
        let path = self.run_dir(run).join(name);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Hash every file written for `run` into `manifest.json`.
    pub async fn write_manifest(&self, run: &str) -> anyhow::Result<PathBuf> {
        let run_dir = self.run_dir(run);
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&run_dir)
            .await
            .with_context(|| format!("reading {}", run_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == MANIFEST_FILE {
                continue;
            }
            if entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();

        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let path = run_dir.join(&name);
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            files.push(SnapshotManifestFile {
                sha256: Self::sha256_hex(&bytes),
                bytes: bytes.len() as u64,
                name,
            });
        }

        let manifest = SnapshotManifest {
            run: run.to_string(),
            files,
        };
        Ok(self.write_json(run, MANIFEST_FILE, &manifest).await?.absolute_path)
    }

    /// Run keys in chronological order.
    pub async fn runs(&self) -> anyhow::Result<Vec<String>> {
        if !fs::try_exists(&self.root)
            .await
            .with_context(|| format!("checking {}", self.root.display()))?
        {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                runs.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Merge the string map stored as `name` in every run; later runs win.
    pub async fn load_merged_maps(&self, name: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let mut merged = BTreeMap::new();
        for run in self.runs().await? {
            let path = self.run_dir(&run).join(name);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let map: BTreeMap<String, String> = self.read_json(&run, name).await?;
            merged.extend(map);
        }
        Ok(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Only server errors are retried; every 4xx surfaces immediately.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Connection reset, DNS failure, connect timeout and refused connections are retryable.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        return RetryDisposition::Retryable;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
            ) {
                return RetryDisposition::Retryable;
            }
        }
        source = inner.source();
    }
    RetryDisposition::NonRetryable
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Decode { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

/// Whether a call may be repeated after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
}

/// Bearer-authenticated JSON client. Reads retry with capped exponential
/// backoff; writes are attempted exactly once.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn get_json(
        &self,
        url: &str,
        bearer: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        self.execute(Method::GET, url, CallKind::Read, || {
            self.client.get(url).bearer_auth(bearer).query(query)
        })
        .await
    }

    /// POST used for lookups (search endpoints); retried like a GET.
    pub async fn query_json(
        &self,
        url: &str,
        bearer: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, FetchError> {
        self.execute(Method::POST, url, CallKind::Read, || {
            self.client.post(url).bearer_auth(bearer).json(body)
        })
        .await
    }

    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        bearer: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, FetchError> {
        self.execute(method.clone(), url, CallKind::Write, || {
            self.client
                .request(method.clone(), url)
                .bearer_auth(bearer)
                .json(body)
        })
        .await
    }

    async fn execute<F>(
        &self,
        method: Method,
        url: &str,
        kind: CallKind,
        build: F,
    ) -> Result<JsonValue, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let span = info_span!("http_call", %method, url, ?kind);
        self.execute_inner(url, kind, build).instrument(span).await
    }

    async fn execute_inner<F>(
        &self,
        url: &str,
        kind: CallKind,
        build: F,
    ) -> Result<JsonValue, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = match kind {
            CallKind::Read => self.backoff.max_retries,
            CallKind::Write => 0,
        };

        let mut attempt = 0usize;
        loop {
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        if bytes.iter().all(u8::is_ascii_whitespace) {
                            return Ok(JsonValue::Null);
                        }
                        return serde_json::from_slice(&bytes).map_err(|source| {
                            FetchError::Decode {
                                url: final_url,
                                source,
                            }
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < max_retries
                    {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(status = status.as_u16(), attempt, ?delay, "server error; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < max_retries
                    {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(error = %err, attempt, ?delay, "transient network failure; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}
