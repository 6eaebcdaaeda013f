use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use duel_core::judge::JudgeGateway;
use duel_judge::{HttpJudge, InMemoryLibrary, ReliableConfig, ReliableJudge, UnconfiguredJudge};
use duel_server::{CoordinatorConfig, ServerConfig};
use duel_settings::{DuelSettings, JudgeSettings};
use duel_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use tracing::{info, warn};

/// Live coding duel server.
#[derive(Debug, Parser)]
#[command(name = "duel", version)]
struct Args {
    /// Settings file (defaults to ~/.duel/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Judge endpoint, overriding settings and DUEL_JUDGE_URL.
    #[arg(long)]
    judge_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load(&args)?;

    let level = parse_level(&settings.logging.level).unwrap_or(tracing::Level::INFO);
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: level,
        json: settings.logging.json,
        ..Default::default()
    });

    let library = match &settings.challenges.library_path {
        Some(path) => InMemoryLibrary::with_file(Path::new(path))
            .with_context(|| format!("loading challenge library from {path}"))?,
        None => InMemoryLibrary::builtin(),
    };
    info!(challenges = library.len(), "challenge library ready");

    let judge = build_judge(&settings.judge)?;
    let handle = duel_server::start(
        server_config(&settings),
        Arc::new(library),
        judge,
        telemetry.metrics(),
    )
    .await
    .context("starting server")?;
    info!(port = handle.port, "duel server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    handle.shutdown().await;
    Ok(())
}

fn load(args: &Args) -> anyhow::Result<DuelSettings> {
    let mut settings = match &args.config {
        Some(path) => duel_settings::load_settings_from_path(path),
        None => duel_settings::load_settings(),
    }
    .context("loading settings")?;

    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(url) = &args.judge_url {
        settings.judge.url = Some(url.clone());
    }
    settings.validate().context("validating settings")?;
    Ok(settings)
}

fn build_judge(settings: &JudgeSettings) -> anyhow::Result<Arc<dyn JudgeGateway>> {
    let Some(url) = &settings.url else {
        warn!("no judge url configured, every submission will fail judgment");
        return Ok(Arc::new(UnconfiguredJudge));
    };
    let http = HttpJudge::new(url.clone(), settings.timeout()).context("building judge client")?;
    info!(url = %url, "judge configured");
    Ok(Arc::new(ReliableJudge::new(http, reliable_config(settings))))
}

fn reliable_config(settings: &JudgeSettings) -> ReliableConfig {
    ReliableConfig {
        max_retries: settings.max_retries,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        attempt_timeout: settings.timeout(),
        circuit_breaker_threshold: settings.circuit_breaker_threshold,
        circuit_breaker_cooldown: Duration::from_secs(settings.circuit_breaker_cooldown_secs),
        ..Default::default()
    }
}

fn server_config(settings: &DuelSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval: settings.server.heartbeat_interval(),
        client_timeout: settings.server.client_timeout(),
        coordinator: CoordinatorConfig {
            default_duel: Duration::from_secs(settings.session.default_duel_secs),
            terminal_retention: Duration::from_secs(settings.session.terminal_retention_secs),
            // Headroom over the retry budget so the gateway's own timeout fires first.
            judge_budget: settings.judge.total_budget() + Duration::from_secs(1),
        },
    }
}
