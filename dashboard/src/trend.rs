use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Changes smaller than this are shown as flat.
pub const TREND_THRESHOLD: f64 = 0.1;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

impl TrendDirection {
    pub fn arrow(&self) -> &'static str {
        match self {
            TrendDirection::Rising => "↑",
            TrendDirection::Falling => "↓",
            TrendDirection::Flat => "→",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendResult {
    pub direction: TrendDirection,
    pub delta: f64,
}

pub fn compute_trend(current: f64, previous: f64) -> TrendResult {
    let delta = current - previous;
    let direction = if delta.abs() < TREND_THRESHOLD {
        TrendDirection::Flat
    } else if delta > 0.0 {
        TrendDirection::Rising
    } else {
        TrendDirection::Falling
    };
    TrendResult { direction, delta }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Unknown,
}

impl Freshness {
    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Unknown => "unknown",
        }
    }
}

/// Parses an upstream timestamp. Timestamps without an offset are read in
/// `offset`, the platform's local time.
pub fn parse_update_time(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn freshness(
    latest_update: Option<&str>,
    now: DateTime<Utc>,
    window: Duration,
    offset: FixedOffset,
) -> Freshness {
    let Some(updated) = latest_update.and_then(|raw| parse_update_time(raw, offset)) else {
        return Freshness::Unknown;
    };
    // Clock skew can put the update slightly in the future.
    match (now - updated).to_std() {
        Ok(age) if age > window => Freshness::Stale,
        _ => Freshness::Fresh,
    }
}
