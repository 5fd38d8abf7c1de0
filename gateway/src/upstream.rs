use crate::errors::Result;
use crate::model::DatastreamQuery;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Header OneNET reads the API key from.
pub const API_KEY_HEADER: &str = "api-key";

const UPSTREAM_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Status and body of one upstream answer, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: String,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A single outbound GET. Implemented over reqwest in production and by
/// counting stubs in tests.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, url: Url, api_key: Option<&str>) -> Result<UpstreamReply>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("onenet-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn get(&self, url: Url, api_key: Option<&str>) -> Result<UpstreamReply> {
        let mut request = self
            .client
            .get(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(UpstreamReply { status, body })
    }
}

/// Builds `{base}/devices/{device_id}/datapoints?...` for a validated query.
pub fn datapoints_url(base: &str, query: &DatastreamQuery) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["devices", query.device_id.as_str(), "datapoints"]);

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("datastream_id", &query.datastream_ids.join(","));
        pairs.append_pair("limit", &query.limit.to_string());
        if let Some(start) = query.start {
            pairs.append_pair("start", &start.format(UPSTREAM_TIMESTAMP_FORMAT).to_string());
        }
        if let Some(end) = query.end {
            pairs.append_pair("end", &end.format(UPSTREAM_TIMESTAMP_FORMAT).to_string());
        }
    }

    Ok(url)
}

/// Classification of a non-2xx upstream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Authentication,
    DeviceNotFound,
    BadRequest,
    Other(u16),
}

impl UpstreamFailure {
    pub fn classify(status: u16) -> Self {
        match status {
            401 => UpstreamFailure::Authentication,
            404 => UpstreamFailure::DeviceNotFound,
            400 => UpstreamFailure::BadRequest,
            other => UpstreamFailure::Other(other),
        }
    }

    /// Metric label.
    pub fn class(&self) -> &'static str {
        match self {
            UpstreamFailure::Authentication => "authentication",
            UpstreamFailure::DeviceNotFound => "not_found",
            UpstreamFailure::BadRequest => "bad_request",
            UpstreamFailure::Other(_) => "other",
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Authentication => write!(f, "authentication failed"),
            UpstreamFailure::DeviceNotFound => write!(f, "device not found"),
            UpstreamFailure::BadRequest => write!(f, "bad request parameters"),
            UpstreamFailure::Other(status) => write!(f, "upstream error {}", status),
        }
    }
}
