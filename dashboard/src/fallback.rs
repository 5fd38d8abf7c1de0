//! Ordered relay chain for calling the cloud API without the gateway.
//!
//! Relays are tried one after another with a fixed pause between attempts.
//! When every relay has failed, one direct call is made; only a transport
//! failure of that last call fails the whole fetch.

use crate::errors::RelayError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const IDENTIFICATION_HEADER: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

pub const DEFAULT_RELAYS: &str = concat!(
    "https://cors-anywhere.herokuapp.com/,",
    "https://api.allorigins.win/raw?url=,",
    "https://corsproxy.io/?url=",
);

const NO_PREFERENCE: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: String,
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One way of getting a request to its target.
#[async_trait]
pub trait Relay: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, request: &RelayRequest) -> Result<RelayResponse, RelayError>;
}

/// Relay that prefixes the target URL, e.g. `https://relay.example/` +
/// `https://api.heclouds.com/...`. Prefixes ending in `=` take the target as
/// a percent-encoded query value instead.
pub struct HttpRelay {
    name: String,
    prefix: Option<String>,
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn prefixed(prefix: &str, client: reqwest::Client) -> Self {
        Self {
            name: prefix.to_string(),
            prefix: Some(prefix.to_string()),
            client,
        }
    }

    pub fn direct(client: reqwest::Client) -> Self {
        Self {
            name: "direct".to_string(),
            prefix: None,
            client,
        }
    }

    pub fn target(&self, url: &str) -> String {
        match &self.prefix {
            None => url.to_string(),
            Some(prefix) if prefix.ends_with('=') => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
                format!("{}{}", prefix, encoded)
            }
            Some(prefix) => format!("{}{}", prefix, url),
        }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, request: &RelayRequest) -> Result<RelayResponse, RelayError> {
        let mut builder = self.client.get(self.target(&request.url));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if self.prefix.is_some() {
            builder = builder.header(IDENTIFICATION_HEADER.0, IDENTIFICATION_HEADER.1);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(RelayResponse { status, body })
    }
}

pub struct FallbackChain {
    relays: Vec<Box<dyn Relay>>,
    direct: Box<dyn Relay>,
    pacing: Duration,
    preferred: AtomicUsize,
}

impl FallbackChain {
    pub fn new(relays: Vec<Box<dyn Relay>>, direct: Box<dyn Relay>, pacing: Duration) -> Self {
        Self {
            relays,
            direct,
            pacing,
            preferred: AtomicUsize::new(NO_PREFERENCE),
        }
    }

    /// Index of the relay that last succeeded, if any.
    pub fn last_successful(&self) -> Option<usize> {
        let index = self.preferred.load(Ordering::Relaxed);
        (index < self.relays.len()).then_some(index)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    fn attempt_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.relays.len()).collect();
        if let Some(preferred) = self.last_successful() {
            order.retain(|&i| i != preferred);
            order.insert(0, preferred);
        }
        order
    }

    pub async fn fetch(&self, request: &RelayRequest) -> Result<RelayResponse, RelayError> {
        let mut attempts = 0;
        let mut last_error = String::from("no relays configured");

        for index in self.attempt_order() {
            if attempts > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            attempts += 1;
            let relay = &self.relays[index];
            debug!(attempt = attempts, relay = index, "Trying relay {}", relay.name());

            match relay.attempt(request).await {
                Ok(response) if response.is_success() => {
                    self.preferred.store(index, Ordering::Relaxed);
                    info!(
                        attempt = attempts,
                        relay = index,
                        "Fetched through relay {}",
                        relay.name()
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    warn!(
                        relay = index,
                        status = response.status,
                        "Relay {} rejected request",
                        relay.name()
                    );
                    last_error = format!("{} answered HTTP {}", relay.name(), response.status);
                }
                Err(e) => {
                    warn!(relay = index, "Relay {} failed: {}", relay.name(), e);
                    last_error = format!("{}: {}", relay.name(), e);
                }
            }
        }

        if attempts > 0 {
            tokio::time::sleep(self.pacing).await;
        }
        attempts += 1;
        info!(
            attempt = attempts,
            "All relays failed ({}), trying direct request",
            last_error
        );

        match self.direct.attempt(request).await {
            Ok(response) => {
                if !response.is_success() {
                    warn!(status = response.status, "Direct request answered with an error status");
                }
                Ok(response)
            }
            Err(e) => Err(RelayError::Exhausted {
                attempts,
                last_error: format!("{}: {}", self.direct.name(), e),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedRelay;
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> RelayRequest {
        RelayRequest {
            url: "https://api.heclouds.com/devices/dev123/datapoints?limit=20".to_string(),
            headers: vec![("api-key".to_string(), "k".to_string())],
        }
    }

    #[tokio::test]
    async fn test_last_relay_succeeds_after_n_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![
                ScriptedRelay::boxed("r0", Err("connection reset".to_string()), &calls),
                ScriptedRelay::boxed("r1", Ok(403), &calls),
                ScriptedRelay::boxed("r2", Ok(200), &calls),
            ],
            ScriptedRelay::boxed("direct", Ok(200), &calls),
            Duration::ZERO,
        );

        let response = chain.fetch(&request()).await.unwrap();

        assert_eq!(response.body, "body from r2");
        assert_eq!(chain.last_successful(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_remembered_relay_tried_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![
                ScriptedRelay::boxed("r0", Ok(502), &calls),
                ScriptedRelay::boxed("r1", Ok(200), &calls),
            ],
            ScriptedRelay::boxed("direct", Ok(200), &calls),
            Duration::ZERO,
        );

        chain.fetch(&request()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let response = chain.fetch(&request()).await.unwrap();
        assert_eq!(response.body, "body from r1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_direct_attempt_after_relays_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![
                ScriptedRelay::boxed("r0", Ok(500), &calls),
                ScriptedRelay::boxed("r1", Err("timeout".to_string()), &calls),
            ],
            ScriptedRelay::boxed("direct", Ok(200), &calls),
            Duration::ZERO,
        );

        let response = chain.fetch(&request()).await.unwrap();
        assert_eq!(response.body, "body from direct");
        assert_eq!(chain.last_successful(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_direct_error_status_is_surfaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![ScriptedRelay::boxed("r0", Ok(500), &calls)],
            ScriptedRelay::boxed("direct", Ok(401), &calls),
            Duration::ZERO,
        );

        let response = tokio_test::block_on(chain.fetch(&request())).unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_everything_failing_is_one_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![
                ScriptedRelay::boxed("r0", Err("dns".to_string()), &calls),
                ScriptedRelay::boxed("r1", Ok(503), &calls),
            ],
            ScriptedRelay::boxed("direct", Err("cors blocked".to_string()), &calls),
            Duration::ZERO,
        );

        let err = chain.fetch(&request()).await.unwrap_err();
        match err {
            RelayError::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("cors blocked"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_paced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackChain::new(
            vec![
                ScriptedRelay::boxed("r0", Ok(500), &calls),
                ScriptedRelay::boxed("r1", Ok(500), &calls),
            ],
            ScriptedRelay::boxed("direct", Ok(200), &calls),
            Duration::from_millis(500),
        );

        let started = tokio::time::Instant::now();
        chain.fetch(&request()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn test_relay_targets() {
        let client = reqwest::Client::new();
        let plain = HttpRelay::prefixed("https://relay.example/", client.clone());
        assert_eq!(
            plain.target("https://api.heclouds.com/x?a=1"),
            "https://relay.example/https://api.heclouds.com/x?a=1"
        );

        let encoded = HttpRelay::prefixed("https://relay.example/raw?url=", client.clone());
        assert_eq!(
            encoded.target("https://api.heclouds.com/x?a=1"),
            "https://relay.example/raw?url=https%3A%2F%2Fapi.heclouds.com%2Fx%3Fa%3D1"
        );

        let direct = HttpRelay::direct(client);
        assert_eq!(direct.target("https://api.heclouds.com/x"), "https://api.heclouds.com/x");
    }

    #[tokio::test]
    async fn test_http_relay_adds_identification_header() {
        let server = MockServer::start().await;
        let target = "https://api.heclouds.com/devices/dev123/datapoints";
        Mock::given(method("GET"))
            .and(path("/raw"))
            .and(query_param("url", target))
            .and(header("X-Requested-With", "XMLHttpRequest"))
            .and(header("api-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_string("relayed"))
            .expect(1)
            .mount(&server)
            .await;

        let relay =
            HttpRelay::prefixed(&format!("{}/raw?url=", server.uri()), reqwest::Client::new());
        let response = relay
            .attempt(&RelayRequest {
                url: target.to_string(),
                headers: vec![("api-key".to_string(), "k".to_string())],
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "relayed");
    }
}
