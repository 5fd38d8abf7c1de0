//! Connectivity self-test served at `/api/diagnostics`.
//!
//! Checks run in a fixed order and never short-circuit: a check that errors
//! is recorded as failed and the next one still runs.

use crate::config::{Config, API_KEY_ENV};
use crate::model::TelemetryParams;
use crate::upstream::{datapoints_url, UpstreamClient, UpstreamFailure};
use crate::validate::validate;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::future::Future;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    NotApplicable,
}

impl Serialize for CheckStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CheckStatus::Passed => serializer.serialize_bool(true),
            CheckStatus::Failed => serializer.serialize_bool(false),
            CheckStatus::NotApplicable => serializer.serialize_str("not-applicable"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub passed: CheckStatus,
    pub message: String,
}

impl CheckOutcome {
    fn passed(message: impl Into<String>) -> Self {
        Self {
            passed: CheckStatus::Passed,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            passed: CheckStatus::Failed,
            message: message.into(),
        }
    }

    fn not_applicable(message: impl Into<String>) -> Self {
        Self {
            passed: CheckStatus::NotApplicable,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Configuration,
    Network,
    Upstream,
    Device,
}

impl Check {
    fn name(&self) -> &'static str {
        match self {
            Check::Configuration => "configuration",
            Check::Network => "network",
            Check::Upstream => "upstream",
            Check::Device => "device",
        }
    }

    fn hint(&self) -> String {
        match self {
            Check::Configuration => format!(
                "Set the {} environment variable in the deployment settings and restart the gateway.",
                API_KEY_ENV
            ),
            Check::Network => {
                "The gateway host has no outbound connectivity; check DNS and firewall rules.".to_string()
            }
            Check::Upstream => {
                "The OneNET API is unreachable; check ONENET_BASE_URL and the platform status.".to_string()
            }
            Check::Device => {
                "Check that the device id exists and that the API key has read access to it.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tests {
    pub configuration: CheckOutcome,
    pub network: CheckOutcome,
    pub upstream: CheckOutcome,
    pub device: CheckOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub not_applicable: usize,
    pub overall: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub api_key_exists: bool,
    pub api_key_length: usize,
    pub upstream_base_url: String,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub timestamp: DateTime<Utc>,
    pub status: &'static str,
    pub environment: EnvironmentInfo,
    pub request: RequestInfo,
    pub tests: Tests,
    pub summary: Summary,
}

pub async fn run_diagnostics(
    config: &Config,
    upstream: &dyn UpstreamClient,
    device_id: Option<&str>,
    request: RequestInfo,
) -> DiagnosticsReport {
    let configuration = settle(Check::Configuration, check_configuration(config)).await;
    let network = settle(Check::Network, check_network(config, upstream)).await;
    let upstream_check = settle(Check::Upstream, check_upstream(config, upstream)).await;
    let device = settle(Check::Device, check_device(config, upstream, device_id)).await;

    let ordered = [
        (Check::Configuration, &configuration),
        (Check::Network, &network),
        (Check::Upstream, &upstream_check),
        (Check::Device, &device),
    ];
    let summary = summarize(&ordered);
    info!(
        overall = summary.overall,
        passed = summary.passed,
        failed = summary.failed,
        "Diagnostics finished"
    );

    DiagnosticsReport {
        timestamp: Utc::now(),
        status: "OK",
        environment: EnvironmentInfo {
            api_key_exists: config.api_key().is_some(),
            api_key_length: config.api_key_len(),
            upstream_base_url: config.upstream_base_url.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
        request,
        tests: Tests {
            configuration,
            network,
            upstream: upstream_check,
            device,
        },
        summary,
    }
}

async fn settle(
    check: Check,
    outcome: impl Future<Output = anyhow::Result<CheckOutcome>>,
) -> CheckOutcome {
    match outcome.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(check = check.name(), "Diagnostic check errored: {:#}", e);
            CheckOutcome::failed(format!("{} check errored: {:#}", check.name(), e))
        }
    }
}

fn summarize(outcomes: &[(Check, &CheckOutcome)]) -> Summary {
    let applicable: Vec<_> = outcomes
        .iter()
        .filter(|(_, o)| o.passed != CheckStatus::NotApplicable)
        .collect();
    let passed = applicable
        .iter()
        .filter(|(_, o)| o.passed == CheckStatus::Passed)
        .count();
    let first_failure = applicable
        .iter()
        .find(|(_, o)| o.passed == CheckStatus::Failed)
        .map(|(check, _)| *check);

    Summary {
        total: applicable.len(),
        passed,
        failed: applicable.len() - passed,
        not_applicable: outcomes.len() - applicable.len(),
        overall: if first_failure.is_some() { "FAIL" } else { "PASS" },
        hint: first_failure.map(|check| check.hint()),
    }
}

async fn check_configuration(config: &Config) -> anyhow::Result<CheckOutcome> {
    Ok(match config.api_key() {
        Some(key) => CheckOutcome::passed(format!("{} is set ({} chars)", API_KEY_ENV, key.len())),
        None => CheckOutcome::failed(format!("{} is not set", API_KEY_ENV)),
    })
}

async fn check_network(
    config: &Config,
    upstream: &dyn UpstreamClient,
) -> anyhow::Result<CheckOutcome> {
    let url = Url::parse(&config.network_probe_url)?;
    let reply = upstream.get(url, None).await?;
    Ok(CheckOutcome::passed(format!(
        "{} answered HTTP {}",
        config.network_probe_url, reply.status
    )))
}

async fn check_upstream(
    config: &Config,
    upstream: &dyn UpstreamClient,
) -> anyhow::Result<CheckOutcome> {
    let url = Url::parse(&config.upstream_base_url)?;
    let reply = upstream.get(url, config.api_key()).await?;
    Ok(CheckOutcome::passed(format!(
        "{} answered HTTP {}",
        config.upstream_base_url, reply.status
    )))
}

async fn check_device(
    config: &Config,
    upstream: &dyn UpstreamClient,
    device_id: Option<&str>,
) -> anyhow::Result<CheckOutcome> {
    let Some(device_id) = device_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(CheckOutcome::not_applicable("no device_id given"));
    };
    let Some(api_key) = config.api_key() else {
        return Ok(CheckOutcome::not_applicable("no API key to authenticate with"));
    };

    let query = validate(&TelemetryParams {
        device_id: Some(device_id.to_string()),
        limit: Some("1".to_string()),
        ..TelemetryParams::default()
    })?;
    let url = datapoints_url(&config.upstream_base_url, &query)?;
    let reply = upstream.get(url, Some(api_key)).await?;

    Ok(if reply.is_success() {
        CheckOutcome::passed(format!("device {} is reachable", device_id))
    } else {
        CheckOutcome::failed(format!(
            "device {}: {}",
            device_id,
            UpstreamFailure::classify(reply.status)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::upstream::stub::StubUpstream;
    use crate::upstream::UpstreamReply;
    use secrecy::SecretString;

    fn config(with_key: bool) -> Config {
        Config {
            api_key: with_key.then(|| SecretString::from("k3y".to_string())),
            upstream_base_url: "http://upstream.test".to_string(),
            network_probe_url: "http://probe.test".to_string(),
            ..Config::default()
        }
    }

    fn request() -> RequestInfo {
        RequestInfo {
            method: "GET".to_string(),
            path: "/api/diagnostics".to_string(),
        }
    }

    fn reply(status: u16) -> crate::errors::Result<UpstreamReply> {
        Ok(UpstreamReply {
            status,
            body: String::new(),
        })
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let upstream = StubUpstream::new(|_| reply(200));
        let report = run_diagnostics(&config(true), &upstream, Some("dev123"), request()).await;

        assert_eq!(report.summary.overall, "PASS");
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.passed, 4);
        assert!(report.summary.hint.is_none());
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_device_not_applicable_without_device_id() {
        let upstream = StubUpstream::new(|_| reply(200));
        let report = run_diagnostics(&config(true), &upstream, None, request()).await;

        assert_eq!(report.tests.device.passed, CheckStatus::NotApplicable);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.not_applicable, 1);
        assert_eq!(report.summary.overall, "PASS");
    }

    #[tokio::test]
    async fn test_missing_key_fails_with_configuration_hint() {
        let upstream = StubUpstream::new(|_| reply(401));
        let report = run_diagnostics(&config(false), &upstream, Some("dev123"), request()).await;

        assert_eq!(report.tests.configuration.passed, CheckStatus::Failed);
        assert_eq!(report.tests.device.passed, CheckStatus::NotApplicable);
        assert_eq!(report.summary.overall, "FAIL");
        assert!(report.summary.hint.unwrap().contains("ONENET_API_KEY"));
        assert!(!report.environment.api_key_exists);
        assert_eq!(report.environment.api_key_length, 0);
    }

    #[tokio::test]
    async fn test_erroring_check_does_not_stop_the_rest() {
        let upstream = StubUpstream::new(|url| {
            if url.host_str() == Some("probe.test") {
                Err(Error::Configuration("dns lookup failed".to_string()))
            } else {
                reply(200)
            }
        });
        let report = run_diagnostics(&config(true), &upstream, Some("dev123"), request()).await;

        assert_eq!(report.tests.network.passed, CheckStatus::Failed);
        assert!(report.tests.network.message.contains("dns lookup failed"));
        assert_eq!(report.tests.upstream.passed, CheckStatus::Passed);
        assert_eq!(report.tests.device.passed, CheckStatus::Passed);
        assert_eq!(report.summary.failed, 1);
        assert!(report.summary.hint.unwrap().contains("outbound connectivity"));
    }

    #[tokio::test]
    async fn test_unknown_device_fails_device_check() {
        let upstream = StubUpstream::new(|url| {
            if url.path().starts_with("/devices/") {
                reply(404)
            } else {
                reply(200)
            }
        });
        let report = run_diagnostics(&config(true), &upstream, Some("ghost"), request()).await;

        assert_eq!(report.tests.device.passed, CheckStatus::Failed);
        assert_eq!(report.tests.device.message, "device ghost: device not found");
        assert_eq!(report.summary.overall, "FAIL");
    }

    #[test]
    fn test_check_status_serialization() {
        let json = serde_json::to_value([
            CheckStatus::Passed,
            CheckStatus::Failed,
            CheckStatus::NotApplicable,
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!([true, false, "not-applicable"]));
    }
}
