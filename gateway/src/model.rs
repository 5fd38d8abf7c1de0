use crate::errors::Error;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use telemetry_core::{NormalizedTelemetry, StreamSummary};

/// Raw query string of a telemetry request. Every field is optional here so
/// that missing parameters reach validation instead of failing extraction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryParams {
    pub device_id: Option<String>,
    pub datastream_id: Option<String>,
    pub limit: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Validated request for one device's datapoints.
#[derive(Debug, Clone, PartialEq)]
pub struct DatastreamQuery {
    pub device_id: String,
    pub datastream_ids: Vec<String>,
    pub limit: u32,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// JSON envelope returned by every gateway endpoint that proxies telemetry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Envelope {
    pub fn telemetry(telemetry: &NormalizedTelemetry, raw: Value) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(telemetry).unwrap_or(Value::Null)),
            raw: Some(raw),
            ..Self::default()
        }
    }

    /// Upstream answered 2xx but without usable datastreams. `data` is an
    /// explicit null so clients can tell it apart from the pass-through shape.
    pub fn malformed(reason: String, raw: Value) -> Self {
        Self {
            success: true,
            data: Some(Value::Null),
            raw: Some(raw),
            message: Some(reason),
            ..Self::default()
        }
    }

    pub fn passthrough(raw: Value) -> Self {
        Self {
            success: true,
            data: Some(raw),
            ..Self::default()
        }
    }

    pub fn failure(error: &Error) -> Self {
        let mut envelope = Self {
            success: false,
            error: Some(error.to_string()),
            kind: Some(error.kind().to_string()),
            ..Self::default()
        };
        match error {
            Error::InvalidInput { hint, .. } => envelope.message = Some(hint.clone()),
            Error::Upstream { body, .. } => envelope.details = Some(body.clone()),
            _ => {}
        }
        envelope
    }

    pub fn internal(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            kind: Some("InternalError".to_string()),
            ..Self::default()
        }
    }
}
