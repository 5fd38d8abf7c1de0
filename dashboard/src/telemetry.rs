use crate::errors::{FetchError, Result};
use serde::Deserialize;
use serde_json::Value;
use telemetry_core::{normalize, NormalizedPayload};

pub use telemetry_core::{NormalizedTelemetry, StreamSummary};

/// Gateway response envelope. Every field but `success` may be absent.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub raw: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reads a successful gateway envelope. Prefers the gateway's normalized
/// `data`, then falls back to folding `raw` (or a pass-through `data`)
/// locally.
pub fn from_envelope(device_id: &str, envelope: GatewayEnvelope) -> Result<NormalizedTelemetry> {
    if !envelope.success {
        return Err(FetchError::Malformed(
            envelope
                .error
                .unwrap_or_else(|| "gateway reported failure".to_string()),
        ));
    }

    let normalized = envelope
        .data
        .as_ref()
        .filter(|d| d.get("datastreams").map_or(false, Value::is_object));
    if let Some(data) = normalized {
        return serde_json::from_value(data.clone())
            .map_err(|e| FetchError::Malformed(format!("normalized data: {}", e)));
    }

    match envelope.raw.as_ref().or(envelope.data.as_ref()).filter(|v| !v.is_null()) {
        Some(raw) => from_raw(device_id, raw),
        None => Err(FetchError::Malformed(
            envelope
                .message
                .unwrap_or_else(|| "response carried no telemetry".to_string()),
        )),
    }
}

/// Folds an upstream `{errno, data: {datastreams: [...]}}` payload.
pub fn from_raw(device_id: &str, raw: &Value) -> Result<NormalizedTelemetry> {
    match normalize(device_id, raw) {
        NormalizedPayload::Telemetry(telemetry) => Ok(telemetry),
        NormalizedPayload::Malformed { reason } => Err(FetchError::Malformed(reason)),
    }
}
