use crate::errors::{FetchError, Result};
use crate::fallback::{FallbackChain, RelayRequest};
use crate::telemetry::{self, GatewayEnvelope, NormalizedTelemetry};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

pub const SESSION_HEADER: &str = "X-Dashboard-Session";

#[derive(Debug, Clone, PartialEq)]
pub struct DatastreamQuery {
    pub device_id: String,
    pub datastream_ids: Vec<String>,
    pub limit: u32,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DatastreamQuery {
    fn append_to(&self, url: &mut Url, device_param: bool) {
        let mut pairs = url.query_pairs_mut();
        if device_param {
            pairs.append_pair("device_id", &self.device_id);
        }
        pairs.append_pair("datastream_id", &self.datastream_ids.join(","));
        pairs.append_pair("limit", &self.limit.to_string());
        if let Some(start) = &self.start {
            pairs.append_pair("start", start);
        }
        if let Some(end) = &self.end {
            pairs.append_pair("end", end);
        }
    }
}

/// Where the session gets its telemetry from.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self, query: &DatastreamQuery) -> Result<NormalizedTelemetry>;

    fn describe(&self) -> String;
}

/// Fetches through the gateway, which holds the API key.
pub struct GatewaySource {
    client: reqwest::Client,
    endpoint: Url,
    session_id: String,
}

impl GatewaySource {
    pub fn new(client: reqwest::Client, endpoint: &str, session_id: String) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            session_id,
        })
    }
}

#[async_trait]
impl TelemetrySource for GatewaySource {
    async fn fetch(&self, query: &DatastreamQuery) -> Result<NormalizedTelemetry> {
        let mut url = self.endpoint.clone();
        query.append_to(&mut url, true);
        debug!(%url, "Requesting gateway");

        let response = self
            .client
            .get(url)
            .header(SESSION_HEADER, &self.session_id)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let envelope = serde_json::from_str::<GatewayEnvelope>(&body);

        if !status.is_success() {
            let message = match envelope {
                Ok(envelope) => envelope.error.unwrap_or_else(|| body.clone()),
                Err(_) => body,
            };
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = envelope.map_err(|e| FetchError::Malformed(format!("gateway body: {}", e)))?;
        telemetry::from_envelope(&query.device_id, envelope)
    }

    fn describe(&self) -> String {
        format!("gateway {}", self.endpoint)
    }
}

/// Calls the cloud API itself, routed through the relay fallback chain.
pub struct DirectSource {
    chain: FallbackChain,
    base_url: Url,
    api_key: String,
}

impl DirectSource {
    pub fn new(chain: FallbackChain, base_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            chain,
            base_url: Url::parse(base_url)?,
            api_key,
        })
    }

    fn datapoints_url(&self, query: &DatastreamQuery) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["devices", query.device_id.as_str(), "datapoints"]);
        query.append_to(&mut url, false);
        Ok(url)
    }
}

#[async_trait]
impl TelemetrySource for DirectSource {
    async fn fetch(&self, query: &DatastreamQuery) -> Result<NormalizedTelemetry> {
        let request = RelayRequest {
            url: self.datapoints_url(query)?.to_string(),
            headers: vec![("api-key".to_string(), self.api_key.clone())],
        };
        let response = self.chain.fetch(&request).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                message: response.body,
            });
        }

        let raw: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| FetchError::Malformed(format!("upstream body: {}", e)))?;
        telemetry::from_raw(&query.device_id, &raw)
    }

    fn describe(&self) -> String {
        format!(
            "direct {} via {} relays",
            self.base_url,
            self.chain.relay_count()
        )
    }
}
