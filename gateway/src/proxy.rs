use crate::config::{Config, API_KEY_ENV};
use crate::errors::{Error, Result};
use crate::metrics::{
    CLIENT_ERRORS_TOTAL, REQUESTS_TOTAL, UPSTREAM_FAILURES_TOTAL, UPSTREAM_LATENCY_SECONDS,
};
use crate::model::{Envelope, TelemetryParams};
use crate::upstream::{datapoints_url, UpstreamClient, UpstreamFailure};
use crate::validate::validate;
use serde_json::Value;
use telemetry_core::{normalize, NormalizedPayload};
use tracing::{debug, info, warn};

/// Forwards one telemetry request upstream and shapes the answer.
///
/// Checks run in a fixed order: API key, then input, then the upstream call.
/// Nothing reaches upstream unless both checks pass.
pub async fn fetch_telemetry(
    config: &Config,
    upstream: &dyn UpstreamClient,
    params: &TelemetryParams,
) -> Result<Envelope> {
    REQUESTS_TOTAL.inc();

    let api_key = config.api_key().ok_or_else(|| {
        Error::Configuration(format!("{} environment variable is not set", API_KEY_ENV))
    })?;

    let query = validate(params).inspect_err(|e| {
        CLIENT_ERRORS_TOTAL.inc();
        debug!("Rejected telemetry request: {}", e);
    })?;

    let url = datapoints_url(&config.upstream_base_url, &query)?;
    info!(
        device_id = %query.device_id,
        datastreams = %query.datastream_ids.join(","),
        limit = query.limit,
        api_key_len = api_key.len(),
        "Requesting upstream datapoints"
    );

    let timer = UPSTREAM_LATENCY_SECONDS.start_timer();
    let reply = upstream.get(url, Some(api_key)).await.inspect_err(|e| {
        UPSTREAM_FAILURES_TOTAL.with_label_values(&["transport"]).inc();
        warn!(device_id = %query.device_id, "Upstream call failed: {}", e);
    })?;
    timer.observe_duration();

    if !reply.is_success() {
        let failure = UpstreamFailure::classify(reply.status);
        UPSTREAM_FAILURES_TOTAL
            .with_label_values(&[failure.class()])
            .inc();
        warn!(
            device_id = %query.device_id,
            status = reply.status,
            "Upstream rejected request: {}",
            failure
        );
        return Err(Error::Upstream {
            status: reply.status,
            message: failure.to_string(),
            body: reply.body,
        });
    }

    let raw: Value = serde_json::from_str(&reply.body)?;
    if !config.normalize {
        return Ok(Envelope::passthrough(raw));
    }

    match normalize(&query.device_id, &raw) {
        NormalizedPayload::Telemetry(telemetry) => {
            info!(
                device_id = %query.device_id,
                datastreams = telemetry.total_datastreams,
                "Fetched telemetry"
            );
            Ok(Envelope::telemetry(&telemetry, raw))
        }
        NormalizedPayload::Malformed { reason } => {
            warn!(device_id = %query.device_id, "Upstream payload not usable: {}", reason);
            Ok(Envelope::malformed(reason, raw))
        }
    }
}
