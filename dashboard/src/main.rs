mod errors;
mod fallback;
mod render;
mod session;
mod source;
mod telemetry;
mod trend;

use chrono::FixedOffset;
use clap::Parser;
use fallback::{FallbackChain, HttpRelay, Relay, DEFAULT_RELAYS};
use session::{PollingSession, SessionSettings};
use source::{DirectSource, GatewaySource, TelemetrySource};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Console dashboard polling OneNET telemetry through the gateway or relays.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Device to poll
    #[arg(long, env = "DASHBOARD_DEVICE_ID")]
    device_id: String,

    /// Datastreams to display
    #[arg(long, value_delimiter = ',', default_value = "bat_tem,Hum")]
    datastreams: Vec<String>,

    /// Datapoints requested per datastream
    #[arg(long, default_value_t = 20)]
    limit: u32,

    /// Gateway telemetry endpoint
    #[arg(
        long,
        env = "DASHBOARD_GATEWAY_URL",
        default_value = "http://localhost:8888/api/telemetry"
    )]
    gateway_url: String,

    /// Call the cloud API through the relay chain instead of the gateway
    #[arg(long)]
    direct: bool,

    /// API key for direct mode
    #[arg(long, env = "ONENET_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Cloud API base URL for direct mode
    #[arg(long, env = "ONENET_BASE_URL", default_value = "https://api.heclouds.com")]
    upstream_url: String,

    /// Relay prefixes, tried in order
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_RELAYS)]
    relays: Vec<String>,

    /// Pause between relay attempts, in milliseconds
    #[arg(long, default_value_t = 500)]
    relay_pacing_ms: u64,

    /// HTTP timeout, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Auto-refresh period, in seconds
    #[arg(long, default_value_t = 30)]
    refresh_secs: u64,

    /// Start with auto-refresh enabled
    #[arg(long)]
    auto_refresh: bool,

    /// Data older than this is shown as stale, in seconds
    #[arg(long, default_value_t = 120)]
    fresh_window_secs: u64,

    /// UTC offset of timestamps without a zone, in hours
    #[arg(long, default_value_t = 8, allow_negative_numbers = true)]
    upstream_utc_offset_hours: i32,
}

enum Command {
    Refresh,
    ToggleAuto,
    Device(String),
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "r" | "refresh" => Command::Refresh,
        "a" | "auto" => Command::ToggleAuto,
        "d" | "device" => Command::Device(words.next()?.to_string()),
        "q" | "quit" => Command::Quit,
        _ => Command::Help,
    };
    Some(command)
}

fn build_source(
    args: &Args,
    client: reqwest::Client,
    session_id: String,
) -> Result<Arc<dyn TelemetrySource>, String> {
    if !args.direct {
        let source = GatewaySource::new(client, &args.gateway_url, session_id)
            .map_err(|e| e.to_string())?;
        return Ok(Arc::new(source));
    }

    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| "direct mode needs ONENET_API_KEY or --api-key".to_string())?;
    let relays: Vec<Box<dyn Relay>> = args
        .relays
        .iter()
        .filter(|prefix| !prefix.trim().is_empty())
        .map(|prefix| {
            Box::new(HttpRelay::prefixed(prefix.trim(), client.clone())) as Box<dyn Relay>
        })
        .collect();
    let chain = FallbackChain::new(
        relays,
        Box::new(HttpRelay::direct(client)),
        Duration::from_millis(args.relay_pacing_ms),
    );
    let source =
        DirectSource::new(chain, &args.upstream_url, api_key).map_err(|e| e.to_string())?;
    Ok(Arc::new(source))
}

fn utc_offset(hours: i32) -> Option<FixedOffset> {
    hours.checked_mul(3600).and_then(FixedOffset::east_opt)
}

/// Stdin is read on a plain thread; a pending read must not block runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr so they do not interleave with rendered frames
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let session_id = format!("dashboard-{}", uuid::Uuid::new_v4());
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let source = build_source(&args, client, session_id.clone()).unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    let Some(upstream_offset) = utc_offset(args.upstream_utc_offset_hours) else {
        error!("Invalid UTC offset: {} hours", args.upstream_utc_offset_hours);
        std::process::exit(1);
    };

    let settings = SessionSettings {
        datastream_ids: args.datastreams.clone(),
        limit: args.limit,
        fresh_window: Duration::from_secs(args.fresh_window_secs),
        upstream_offset,
    };

    let mut session = PollingSession::new(source, settings, args.device_id.clone());
    info!(session = %session_id, "Polling {} from {}", args.device_id, session.describe_source());
    let renderer = tokio::spawn(render::run_renderer(session.subscribe()));
    let refresh_period = Duration::from_secs(args.refresh_secs.max(1));

    session.refresh().await;
    if args.auto_refresh {
        session.start_auto_refresh(refresh_period).await;
    }

    println!("commands: r = refresh, a = toggle auto-refresh, d <id> = select device, q = quit");
    let mut lines = spawn_stdin_reader();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Some(Command::Refresh) => session.refresh().await,
                    Some(Command::ToggleAuto) => {
                        if !session.stop_auto_refresh().await {
                            session.start_auto_refresh(refresh_period).await;
                        }
                    }
                    Some(Command::Device(device_id)) => session.select_device(device_id).await,
                    Some(Command::Quit) => break,
                    Some(Command::Help) => {
                        println!("commands: r, a, d <id>, q");
                    }
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.stop_auto_refresh().await;
    let state = session.state().await;
    info!(
        device_id = %state.current_device_id,
        connected = state.is_connected,
        "Dashboard stopped"
    );
    drop(session);
    let _ = renderer.await;
}
