//! Pinecone REST client for the control and data planes.

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{IndexDescription, IndexError, IndexSpec, Metric, VectorIndex};
use crate::record::UpsertUnit;

/// Default control-plane endpoint.
pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Blocking client bound to a single named index.
#[derive(Debug)]
pub struct PineconeIndex {
    client: Client,
    control: Url,
    name: String,
    namespace: String,
    ready_timeout: Duration,
    host: OnceLock<Url>,
}

impl PineconeIndex {
    /// Builds a new Pinecone client for index `name`.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `Api-Key` header (usually from `PINECONE_API_KEY`)
    /// * `control_url` - Control-plane root, e.g. [`DEFAULT_CONTROL_URL`]
    /// * `namespace` - Namespace vectors are written to (empty for the default)
    pub fn new(
        api_key: String,
        control_url: &str,
        name: String,
        namespace: String,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(!name.trim().is_empty(), "missing Pinecone index name");
        let control = Url::parse(control_url)
            .with_context(|| format!("invalid Pinecone control URL {control_url:?}"))?;
        anyhow::ensure!(
            matches!(control.scheme(), "http" | "https"),
            "Pinecone control URL must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            control,
            name,
            namespace,
            ready_timeout: Duration::from_secs(300),
            host: OnceLock::new(),
        })
    }

    /// Overrides how long index creation waits for the index to become ready.
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    fn control_url(&self, path: &str) -> Result<Url, IndexError> {
        self.control
            .join(path)
            .map_err(|err| IndexError::Unexpected(format!("bad control path {path}: {err}")))
    }

    /// Data-plane URL for `path`, resolving the index host on first use.
    fn data_url(&self, path: &str) -> Result<Url, IndexError> {
        let host = match self.host.get() {
            Some(host) => host,
            None => {
                let status = self.fetch_status(&self.name)?;
                let raw = status.description.host.ok_or_else(|| {
                    IndexError::Unexpected(format!("index {} reported no host", self.name))
                })?;
                let resolved = parse_host(&raw)?;
                debug!(index = %self.name, host = %resolved, "resolved data-plane host");
                self.host.get_or_init(|| resolved)
            }
        };
        host.join(path)
            .map_err(|err| IndexError::Unexpected(format!("bad data path {path}: {err}")))
    }

    fn fetch_status(&self, name: &str) -> Result<DescribeResponse, IndexError> {
        let url = self.control_url(&format!("indexes/{name}"))?;
        let resp = send(self.client.get(url))?;
        resp.json()
            .map_err(|err| IndexError::Unexpected(format!("describe_index: {err}")))
    }

    fn wait_until_ready(&self, name: &str) -> Result<(), IndexError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let status = self.fetch_status(name)?;
            if status.status.map(|s| s.ready).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(IndexError::Rejected(format!(
                    "index {name} not ready after {:?}",
                    self.ready_timeout
                )));
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
    }
}

impl VectorIndex for PineconeIndex {
    fn list_indexes(&self) -> Result<Vec<IndexDescription>, IndexError> {
        let url = self.control_url("indexes")?;
        let resp = send(self.client.get(url))?;
        let listed: ListResponse = resp
            .json()
            .map_err(|err| IndexError::Unexpected(format!("list_indexes: {err}")))?;
        Ok(listed.indexes)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let url = self.control_url("indexes")?;
        let request = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: json!({
                "serverless": {"cloud": spec.cloud, "region": spec.region}
            }),
        };
        send(self.client.post(url).json(&request))?;
        info!(
            index = %spec.name,
            dimension = spec.dimension,
            metric = %spec.metric,
            "created index"
        );
        self.wait_until_ready(&spec.name)
    }

    fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError> {
        Ok(self.fetch_status(name)?.description)
    }

    fn upsert(&self, units: &[UpsertUnit]) -> Result<usize, IndexError> {
        let url = self.data_url("vectors/upsert")?;
        let request = UpsertRequest {
            vectors: units,
            namespace: &self.namespace,
        };
        let resp = send(self.client.post(url).json(&request))?;
        let parsed: UpsertResponse = resp
            .json()
            .map_err(|err| IndexError::Unexpected(format!("upsert: {err}")))?;
        Ok(parsed.upserted_count)
    }

    fn describe_index_stats(&self) -> Result<serde_json::Value, IndexError> {
        let url = self.data_url("describe_index_stats")?;
        let resp = send(self.client.post(url).json(&json!({})))?;
        resp.json()
            .map_err(|err| IndexError::Unexpected(format!("describe_index_stats: {err}")))
    }
}

fn send(request: RequestBuilder) -> Result<Response, IndexError> {
    let resp = request.send()?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(IndexError::Service {
        status: status.as_u16(),
        body,
    })
}

fn parse_host(raw: &str) -> Result<Url, IndexError> {
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|err| IndexError::Unexpected(format!("bad index host {raw:?}: {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: Metric,
    spec: serde_json::Value,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [UpsertUnit],
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(flatten)]
    description: IndexDescription,
    #[serde(default)]
    status: Option<ReadyStatus>,
}

#[derive(Debug, Deserialize)]
struct ReadyStatus {
    #[serde(default)]
    ready: bool,
}
