use anyhow::{bail, Context};
use autoapply_core::{
    env::resolve_value,
    logging::{init_logging, Console, LogSettings},
    stream_event::{EventKind, JobAction, StreamEvent},
};
use autoapply_dashboard::{ConnectionManager, DashboardEvent, Reconciler, WsConnector};
use clap::Parser;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

const DEFAULT_STREAM_URL: &str = "ws://127.0.0.1:8000/ws/dashboard";

#[derive(Parser, Debug)]
#[command(name = "autoapply-dashboard")]
struct Args {
    #[arg(long, default_value = "")]
    url: String,
    #[arg(long, default_value = "")]
    token: String,
    #[arg(long, default_value_t = 3_000)]
    reconnect_delay_ms: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_dir = resolve_value(&args.log_dir, "AUTOAPPLY_DASHBOARD_LOG_DIR", "");
    let _log_guard = init_logging(
        &LogSettings::new("autoapply-dashboard", args.debug, Console::Stderr).with_dir(&log_dir),
    );

    let url = resolve_value(&args.url, "AUTOAPPLY_STREAM_URL", DEFAULT_STREAM_URL);
    let token = resolve_value(&args.token, "AUTOAPPLY_TOKEN", "");
    if token.is_empty() {
        bail!("missing credential: pass --token or set AUTOAPPLY_TOKEN");
    }
    let connector = WsConnector::new(&url, &token).context("building stream url")?;
    info!(event = "dashboard_start", endpoint = %connector.endpoint());

    let manager = ConnectionManager::new(connector)
        .with_reconnect_delay(Duration::from_millis(args.reconnect_delay_ms));
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection = tokio::spawn(manager.run(events_tx, shutdown_rx));

    let mut state = Reconciler::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = summary_line(&event) {
                    println!("{line}");
                }
                state.apply(event);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    drop(events_rx);
    let _ = connection.await;
    let status = state.status();
    println!(
        "completed={} in_progress={} failed={} queued={}",
        status.tasks_completed,
        status.tasks_in_progress,
        status.tasks_failed,
        state.queue().len()
    );
    Ok(())
}

fn summary_line(event: &DashboardEvent) -> Option<String> {
    match event {
        DashboardEvent::Connected => Some("[connected]".to_string()),
        DashboardEvent::Disconnected { reason } => Some(format!("[disconnected] {reason}")),
        DashboardEvent::ConnectError { message } => Some(format!("[connect-error] {message}")),
        DashboardEvent::Stream(StreamEvent { kind, .. }) => match kind {
            EventKind::Log(payload) => {
                let level = format!("{:?}", payload.level).to_lowercase();
                Some(format!("[{level}] {}", payload.message))
            }
            EventKind::JobUpdate(payload) if payload.action == JobAction::Applied => Some(format!(
                "[applied] {} @ {}",
                payload.job.title, payload.job.company
            )),
            EventKind::JobUpdate(payload) if payload.action == JobAction::Failed => Some(format!(
                "[failed] {} @ {}: {}",
                payload.job.title,
                payload.job.company,
                payload.job.error.as_deref().unwrap_or("unknown error")
            )),
            EventKind::StatusUpdate(payload) => payload
                .status
                .current_phase
                .as_ref()
                .map(|phase| format!("[phase] {phase}")),
            EventKind::ProcessUpdate(payload) => Some(format!(
                "[progress] {} {}/{} ({}%)",
                payload.stage, payload.progress, payload.total, payload.percentage
            )),
            _ => None,
        },
    }
}
