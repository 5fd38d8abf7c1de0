use crate::session::{ConnectionStatus, DisplayState, StreamView};
use chrono::{Local, TimeZone};
use std::fmt::{Display, Write};
use tokio::sync::watch;

fn status_label(display: &DisplayState) -> &'static str {
    if display.loading {
        return "fetching";
    }
    match display.status {
        ConnectionStatus::Idle => "idle",
        ConnectionStatus::Fetching => "fetching",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
    }
}

fn stream_line(view: &StreamView) -> String {
    let mut line = format!("  {:<10} {:>8}", view.id, view.value);
    if let Some(unit) = &view.unit {
        let _ = write!(line, " {}", unit);
    }
    if let Some(trend) = view.trend {
        let _ = write!(line, "  {} {:+.1}", trend.direction.arrow(), trend.delta);
    }
    let _ = write!(line, "  [{}]", view.freshness.label());
    if let Some(at) = &view.latest_update {
        let _ = write!(line, "  @ {}", at);
    }
    line
}

/// Renders one frame of the console view, update time in local time.
pub fn render(display: &DisplayState) -> String {
    render_in(display, &Local)
}

pub fn render_in<Tz>(display: &DisplayState, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = format!("device {} | {}", display.device_id, status_label(display));
    if let Some(interval) = display.refresh_interval {
        let _ = write!(out, " | auto-refresh {}s", interval.as_secs());
    }
    if let Some(at) = display.last_success {
        let local = at.with_timezone(tz);
        let _ = write!(out, " | updated {}", local.format("%Y-%m-%d %H:%M:%S"));
    }
    out.push('\n');

    for view in &display.streams {
        out.push_str(&stream_line(view));
        out.push('\n');
    }
    if let Some(error) = &display.last_error {
        let _ = writeln!(out, "  error: {}", error);
    }
    out
}

/// Prints a frame every time the display changes, until the session is gone.
pub async fn run_renderer(mut display: watch::Receiver<DisplayState>) {
    loop {
        let frame = render(&display.borrow_and_update());
        println!("{}", frame);
        if display.changed().await.is_err() {
            break;
        }
    }
}
