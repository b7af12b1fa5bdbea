//! CLI command implementations

use crate::output::format_output;
use crate::scenario::{Scenario, ScriptedPlayer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;
use vocplay_core::{
    Error, HttpProbe, MediaProbe, PlayerOptions, Source, Supervisor, SupervisorConfig,
};

#[derive(Debug, Serialize)]
struct ProbeReport {
    url: String,
    reachable: bool,
    elapsed_ms: u64,
    error: Option<String>,
    error_code: Option<&'static str>,
}

/// Probe a media source once
pub async fn probe(source: &str, timeout: f64, format: &str) -> anyhow::Result<()> {
    let url = resolve(source)?;
    let timeout = seconds("--timeout", timeout)?;
    if timeout.is_zero() {
        anyhow::bail!("--timeout must be positive");
    }
    let probe = HttpProbe::new(timeout)?;

    let started = Instant::now();
    let result = probe.probe(&url).await;
    let report = ProbeReport {
        url: url.to_string(),
        reachable: result.is_ok(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        error: result.as_ref().err().map(|e| e.to_string()),
        error_code: result.as_ref().err().map(|e| e.error_code()),
    };
    println!("{}", format_output(&report, format));

    if !report.reachable {
        std::process::exit(1);
    }
    Ok(())
}

fn resolve(source: &str) -> vocplay_core::Result<Url> {
    if source.trim().is_empty() {
        return Err(Error::NoSource);
    }
    Source::from(source)
        .resolve()
        .ok_or_else(|| Error::InvalidSource(source.to_string()))
}

/// Seconds from user input, rejecting negative, NaN and overflowing values
fn seconds(name: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow::anyhow!("{name} must be a non-negative number of seconds, got {value}"))
}

/// Replay a scenario against a scripted player
pub async fn simulate(
    path: &Path,
    config: Option<PathBuf>,
    endpoint: Option<Url>,
    format: &str,
) -> anyhow::Result<()> {
    let scenario: Scenario = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let settle = seconds("settle_secs", scenario.settle_secs)?;
    let mut config = load_config(config)?;
    if endpoint.is_some() {
        config.telemetry.endpoint = endpoint;
    }

    info!(
        scenario = %path.display(),
        steps = scenario.steps.len(),
        content = ?scenario.content,
        "Running scenario"
    );

    let player = ScriptedPlayer::new(&scenario);
    let (supervisor, batcher) =
        Supervisor::with_defaults(player, scenario.options.clone(), &config)?;
    let mut status = supervisor.subscribe_status();
    let (events, events_rx) = mpsc::unbounded_channel();
    let (handle, task) = supervisor.spawn(events_rx);

    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(phase = %current.phase, message = current.message, "Status");
        }
    });

    for step in scenario.steps {
        tokio::time::sleep(step.delay()).await;
        info!(event = ?step.event, "Emitting");
        events
            .send(step.event.into_player_event())
            .map_err(|_| anyhow::anyhow!("supervisor stopped early"))?;
    }
    tokio::time::sleep(settle).await;

    let final_status = handle.status();
    drop(events);
    drop(handle);
    let player = task.await?;
    // Supervisor dropped its telemetry handle, the batcher flushes and exits
    let lost = batcher.await?;
    if lost > 0 {
        warn!(lost, "Telemetry events not delivered");
    }
    watcher.abort();

    #[derive(Serialize)]
    struct SimulationReport {
        phase: String,
        message: Option<&'static str>,
        player: crate::scenario::PlayerReport,
    }

    let report = SimulationReport {
        phase: final_status.phase.to_string(),
        message: final_status.message,
        player: player.report(),
    };
    println!("{}", format_output(&report, format));

    Ok(())
}

fn load_config(file: Option<PathBuf>) -> anyhow::Result<SupervisorConfig> {
    let config = match file {
        Some(path) => SupervisorConfig::from_file(&path)?,
        None => SupervisorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Show the effective config
pub fn config(file: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let config = load_config(file)?;
    println!("{}", format_output(&config, format));
    Ok(())
}

/// Decode embed options
pub fn options(query: &str, format: &str) -> anyhow::Result<()> {
    let options = PlayerOptions::from_query(query);
    println!("{}", format_output(&options, format));
    Ok(())
}
