use crate::config::{DEFAULT_DATASTREAMS, DEFAULT_LIMIT};
use crate::errors::{Error, Result};
use crate::model::{DatastreamQuery, TelemetryParams};
use chrono::{DateTime, NaiveDateTime};

pub const USAGE_HINT: &str =
    "usage: ?device_id=<id>&datastream_id=bat_tem,Hum&limit=20[&start=YYYY-MM-DDTHH:MM:SS][&end=YYYY-MM-DDTHH:MM:SS]";

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Validates a telemetry request and fills in defaults.
pub fn validate(params: &TelemetryParams) -> Result<DatastreamQuery> {
    let device_id = params
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("missing device_id parameter"))?;

    let datastream_ids = split_ids(params.datastream_id.as_deref().unwrap_or(DEFAULT_DATASTREAMS));
    let datastream_ids = if datastream_ids.is_empty() {
        split_ids(DEFAULT_DATASTREAMS)
    } else {
        datastream_ids
    };

    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_LIMIT,
        Some(raw) => match raw.parse::<u32>() {
            Ok(limit) if limit >= 1 => limit,
            _ => return Err(invalid(&format!("limit must be a positive integer, got {:?}", raw))),
        },
    };

    let start = parse_optional_timestamp("start", params.start.as_deref())?;
    let end = parse_optional_timestamp("end", params.end.as_deref())?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(invalid("start must not be after end"));
        }
    }

    Ok(DatastreamQuery {
        device_id: device_id.to_string(),
        datastream_ids,
        limit,
        start,
        end,
    })
}

/// Splits a comma-joined id list, dropping blanks and repeats.
fn split_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn parse_optional_timestamp(name: &str, raw: Option<&str>) -> Result<Option<NaiveDateTime>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    parse_timestamp(raw)
        .map(Some)
        .ok_or_else(|| invalid(&format!("{} is not a valid timestamp: {:?}", name, raw)))
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

fn invalid(message: &str) -> Error {
    Error::InvalidInput {
        message: message.to_string(),
        hint: USAGE_HINT.to_string(),
    }
}
