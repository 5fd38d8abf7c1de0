//! Datapoint model shared by the gateway and the dashboard, and the fold
//! from the cloud API's `datapoints` payload into it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Latest state of one datastream, folded from its datapoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub current_value: Option<f64>,
    #[serde(default)]
    pub previous_value: Option<f64>,
    #[serde(default)]
    pub total_points: usize,
    pub latest_update: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTelemetry {
    pub device_id: String,
    pub total_datastreams: usize,
    pub datastreams: BTreeMap<String, StreamSummary>,
}

/// Outcome of folding an upstream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedPayload {
    Telemetry(NormalizedTelemetry),
    /// The payload parsed as JSON but did not carry datastreams. The raw
    /// payload stays with the caller.
    Malformed { reason: String },
}

/// Folds `data.datastreams[]` into a per-stream map keyed by stream id.
///
/// Datapoints arrive newest first: the first one gives `current_value` and
/// `latest_update`, the second `previous_value`. Streams without datapoints
/// fall back to their own `current_value`/`update_at` fields.
pub fn normalize(device_id: &str, raw: &Value) -> NormalizedPayload {
    if let Some(errno) = raw.get("errno").and_then(Value::as_i64) {
        if errno != 0 {
            let error = raw.get("error").and_then(Value::as_str).unwrap_or("unknown");
            return NormalizedPayload::Malformed {
                reason: format!("upstream errno {}: {}", errno, error),
            };
        }
    }

    let Some(streams) = raw
        .get("data")
        .and_then(|data| data.get("datastreams"))
        .and_then(Value::as_array)
    else {
        return NormalizedPayload::Malformed {
            reason: "upstream payload has no data.datastreams array".to_string(),
        };
    };

    let mut datastreams = BTreeMap::new();
    for stream in streams {
        let Some(id) = stream.get("id").and_then(Value::as_str) else {
            continue;
        };
        datastreams.insert(id.to_string(), summarize(stream));
    }

    NormalizedPayload::Telemetry(NormalizedTelemetry {
        device_id: device_id.to_string(),
        total_datastreams: datastreams.len(),
        datastreams,
    })
}

fn summarize(stream: &Value) -> StreamSummary {
    let points: &[Value] = stream
        .get("datapoints")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let (current_value, latest_update) = match points.first() {
        Some(point) => (
            point.get("value").and_then(numeric),
            point.get("at").and_then(Value::as_str).map(str::to_string),
        ),
        None => (
            stream.get("current_value").and_then(numeric),
            stream.get("update_at").and_then(Value::as_str).map(str::to_string),
        ),
    };

    StreamSummary {
        current_value,
        previous_value: points.get(1).and_then(|p| p.get("value")).and_then(numeric),
        total_points: points.len(),
        latest_update,
        unit: stream.get("unit").and_then(Value::as_str).map(str::to_string),
    }
}

/// Accepts JSON numbers and numeric strings.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "errno": 0,
            "error": "succ",
            "data": {
                "count": 3,
                "datastreams": [
                    {
                        "id": "bat_tem",
                        "unit": "C",
                        "datapoints": [
                            {"at": "2024-05-01 08:00:10.000", "value": "21.5"},
                            {"at": "2024-05-01 08:00:00.000", "value": 21.0}
                        ]
                    },
                    {
                        "id": "Hum",
                        "datapoints": [
                            {"at": "2024-05-01 08:00:10.000", "value": 55}
                        ]
                    }
                ]
            }
        })
    }

    fn expect_telemetry(payload: NormalizedPayload) -> NormalizedTelemetry {
        match payload {
            NormalizedPayload::Telemetry(t) => t,
            NormalizedPayload::Malformed { reason } => panic!("unexpected malformed: {}", reason),
        }
    }

    #[test]
    fn test_normalize_sample() {
        let telemetry = expect_telemetry(normalize("dev123", &sample()));
        assert_eq!(telemetry.device_id, "dev123");
        assert_eq!(telemetry.total_datastreams, 2);

        let temp = &telemetry.datastreams["bat_tem"];
        assert_eq!(temp.current_value, Some(21.5));
        assert_eq!(temp.previous_value, Some(21.0));
        assert_eq!(temp.total_points, 2);
        assert_eq!(temp.latest_update.as_deref(), Some("2024-05-01 08:00:10.000"));
        assert_eq!(temp.unit.as_deref(), Some("C"));

        let hum = &telemetry.datastreams["Hum"];
        assert_eq!(hum.current_value, Some(55.0));
        assert_eq!(hum.previous_value, None);
        assert_eq!(hum.unit, None);
    }

    #[test]
    fn test_stream_without_datapoints_uses_current_value() {
        let raw = json!({"data": {"datastreams": [
            {"id": "Hum", "current_value": "48.2", "update_at": "2024-05-01 07:59:00"}
        ]}});
        let telemetry = expect_telemetry(normalize("dev", &raw));
        let hum = &telemetry.datastreams["Hum"];
        assert_eq!(hum.current_value, Some(48.2));
        assert_eq!(hum.total_points, 0);
        assert_eq!(hum.latest_update.as_deref(), Some("2024-05-01 07:59:00"));
    }

    #[test]
    fn test_missing_datastreams_is_malformed() {
        for raw in [json!({}), json!({"data": {}}), json!({"data": {"datastreams": "x"}})] {
            assert!(matches!(
                normalize("dev", &raw),
                NormalizedPayload::Malformed { .. }
            ));
        }
    }

    #[test]
    fn test_nonzero_errno_is_malformed() {
        let raw = json!({"errno": 3, "error": "auth failed"});
        match normalize("dev", &raw) {
            NormalizedPayload::Malformed { reason } => {
                assert_eq!(reason, "upstream errno 3: auth failed")
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_values_skipped() {
        let raw = json!({"data": {"datastreams": [
            {"id": "gps", "datapoints": [{"at": "t", "value": {"lat": 1}}]},
            {"no_id": true}
        ]}});
        let telemetry = expect_telemetry(normalize("dev", &raw));
        assert_eq!(telemetry.total_datastreams, 1);
        assert_eq!(telemetry.datastreams["gps"].current_value, None);
        assert_eq!(telemetry.datastreams["gps"].total_points, 1);
    }

    #[test]
    fn test_normalized_output_is_byte_identical() {
        let mut rng = rand::thread_rng();
        let streams: Vec<Value> = (0..8)
            .map(|i| {
                let points: Vec<Value> = (0..rng.gen_range(0..5))
                    .map(|p| {
                        json!({
                            "at": format!("2024-05-01 08:00:{:02}", p),
                            "value": rng.gen_range(0.0..100.0),
                        })
                    })
                    .collect();
                json!({"id": format!("stream_{}", i), "datapoints": points})
            })
            .collect();
        let raw = json!({"errno": 0, "data": {"datastreams": streams}});

        let first = expect_telemetry(normalize("dev", &raw));
        let second = expect_telemetry(normalize("dev", &raw));
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
