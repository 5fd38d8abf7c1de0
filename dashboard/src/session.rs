//! Polling session: device selection, manual and timer-driven fetches, and
//! reconciliation of each response into display state.
//!
//! The manual path and the timer path share one `PollingState`. Whichever
//! fetch completes last overwrites the display, regardless of issue order.
//! Responses for a device that is no longer selected are dropped.

use crate::source::{DatastreamQuery, TelemetrySource};
use crate::telemetry::{NormalizedTelemetry, StreamSummary};
use crate::trend::{compute_trend, freshness, Freshness, TrendResult};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shown in place of a value when there is nothing current to show.
pub const NO_DATA: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Fetching,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub datastream_ids: Vec<String>,
    pub limit: u32,
    pub fresh_window: Duration,
    pub upstream_offset: FixedOffset,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            datastream_ids: vec!["bat_tem".to_string(), "Hum".to_string()],
            limit: 20,
            fresh_window: Duration::from_secs(120),
            upstream_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollingState {
    pub current_device_id: String,
    pub status: ConnectionStatus,
    pub is_connected: bool,
    pub last_data: Option<NormalizedTelemetry>,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub in_flight: usize,
    pub refresh_interval: Option<Duration>,
}

impl PollingState {
    fn new(device_id: String) -> Self {
        Self {
            current_device_id: device_id,
            status: ConnectionStatus::Idle,
            is_connected: false,
            last_data: None,
            last_error: None,
            last_success: None,
            in_flight: 0,
            refresh_interval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamView {
    pub id: String,
    pub value: String,
    pub unit: Option<String>,
    pub trend: Option<TrendResult>,
    pub freshness: Freshness,
    pub latest_update: Option<String>,
}

impl StreamView {
    fn no_data(id: &str) -> Self {
        Self {
            id: id.to_string(),
            value: NO_DATA.to_string(),
            unit: None,
            trend: None,
            freshness: Freshness::Unknown,
            latest_update: None,
        }
    }

    fn from_summary(
        id: &str,
        summary: &StreamSummary,
        settings: &SessionSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let trend = match (summary.current_value, summary.previous_value) {
            (Some(current), Some(previous)) => Some(compute_trend(current, previous)),
            _ => None,
        };
        Self {
            id: id.to_string(),
            value: summary
                .current_value
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| NO_DATA.to_string()),
            unit: summary.unit.clone(),
            trend,
            freshness: freshness(
                summary.latest_update.as_deref(),
                now,
                settings.fresh_window,
                settings.upstream_offset,
            ),
            latest_update: summary.latest_update.clone(),
        }
    }
}

/// Everything the UI adapter renders.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub device_id: String,
    pub status: ConnectionStatus,
    pub loading: bool,
    pub streams: Vec<StreamView>,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub refresh_interval: Option<Duration>,
}

/// Derives the display from polling state. Tracked streams missing from the
/// latest data, and every stream after a failure, show `NO_DATA`.
pub fn reconcile(
    state: &PollingState,
    settings: &SessionSettings,
    now: DateTime<Utc>,
) -> DisplayState {
    let streams = settings
        .datastream_ids
        .iter()
        .map(|id| {
            match state.last_data.as_ref().and_then(|data| data.datastreams.get(id)) {
                Some(summary) => StreamView::from_summary(id, summary, settings, now),
                None => StreamView::no_data(id),
            }
        })
        .collect();

    DisplayState {
        device_id: state.current_device_id.clone(),
        status: state.status,
        loading: state.in_flight > 0,
        streams,
        last_error: state.last_error.clone(),
        last_success: state.last_success,
        refresh_interval: state.refresh_interval,
    }
}

struct Shared {
    source: Arc<dyn TelemetrySource>,
    settings: SessionSettings,
    state: RwLock<PollingState>,
    display: watch::Sender<DisplayState>,
}

impl Shared {
    async fn publish(&self) {
        let state = self.state.read().await;
        self.display
            .send_replace(reconcile(&state, &self.settings, Utc::now()));
    }

    async fn refresh(&self) {
        let device_id = {
            let mut state = self.state.write().await;
            state.status = ConnectionStatus::Fetching;
            state.in_flight += 1;
            state.current_device_id.clone()
        };
        self.publish().await;

        let query = DatastreamQuery {
            device_id: device_id.clone(),
            datastream_ids: self.settings.datastream_ids.clone(),
            limit: self.settings.limit,
            start: None,
            end: None,
        };
        let result = self.source.fetch(&query).await;

        {
            let mut state = self.state.write().await;
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.current_device_id != device_id {
                debug!(device_id = %device_id, "Dropping response for deselected device");
            } else {
                match result {
                    Ok(telemetry) => {
                        debug!(
                            device_id = %device_id,
                            datastreams = telemetry.total_datastreams,
                            "Fetched telemetry"
                        );
                        state.status = ConnectionStatus::Connected;
                        state.is_connected = true;
                        state.last_data = Some(telemetry);
                        state.last_error = None;
                        state.last_success = Some(Utc::now());
                    }
                    Err(e) => {
                        warn!(device_id = %device_id, "Fetch failed: {}", e);
                        state.status = ConnectionStatus::Disconnected;
                        state.is_connected = false;
                        state.last_data = None;
                        state.last_error = Some(e.to_string());
                    }
                }
            }
        }
        self.publish().await;
    }
}

/// Repeating refresh timer. Dropping it stops future ticks; fetches it
/// already started run to completion.
pub struct AutoRefresh {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl AutoRefresh {
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct PollingSession {
    shared: Arc<Shared>,
    timer: Option<AutoRefresh>,
}

impl PollingSession {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        settings: SessionSettings,
        device_id: String,
    ) -> Self {
        let state = PollingState::new(device_id);
        let (display, _) = watch::channel(reconcile(&state, &settings, Utc::now()));
        Self {
            shared: Arc::new(Shared {
                source,
                settings,
                state: RwLock::new(state),
                display,
            }),
            timer: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.shared.display.subscribe()
    }

    #[cfg(test)]
    pub fn display(&self) -> DisplayState {
        self.shared.display.borrow().clone()
    }

    pub async fn state(&self) -> PollingState {
        self.shared.state.read().await.clone()
    }

    /// Fetches once for the current device and reconciles the result.
    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.timer.is_some()
    }

    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.timer.as_ref().map(AutoRefresh::interval)
    }

    /// Starts the refresh timer, replacing any running one. The first tick
    /// fires one `period` from now.
    pub async fn start_auto_refresh(&mut self, period: Duration) {
        self.stop_auto_refresh().await;

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.refresh().await });
            }
        });
        self.timer = Some(AutoRefresh {
            handle,
            interval: period,
        });

        self.shared.state.write().await.refresh_interval = Some(period);
        self.shared.publish().await;
        info!("Auto-refresh every {:?}", period);
    }

    /// Stops the refresh timer. Returns whether one was running.
    pub async fn stop_auto_refresh(&mut self) -> bool {
        let Some(timer) = self.timer.take() else {
            return false;
        };
        drop(timer);

        self.shared.state.write().await.refresh_interval = None;
        self.shared.publish().await;
        info!("Auto-refresh stopped");
        true
    }

    /// Switches to another device. Displayed data is cleared first; a running
    /// auto-refresh is restarted against the new device.
    pub async fn select_device(&mut self, device_id: String) {
        let period = self.auto_refresh_interval();
        if period.is_some() {
            self.stop_auto_refresh().await;
        }

        {
            let mut state = self.shared.state.write().await;
            info!(from = %state.current_device_id, to = %device_id, "Selecting device");
            state.current_device_id = device_id;
            state.status = ConnectionStatus::Idle;
            state.is_connected = false;
            state.last_data = None;
            state.last_error = None;
            state.last_success = None;
        }
        self.shared.publish().await;

        self.refresh().await;

        if let Some(period) = period {
            self.start_auto_refresh(period).await;
        }
    }

    pub fn describe_source(&self) -> String {
        self.shared.source.describe()
    }
}
