//! Aegis CLI Module
//!
//! Command-line interface for running the monitor, one-off checks, artifact
//! status and traffic simulation.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::ingest::{SimulationSettings, TrafficSimulator};
use crate::report::{render_text, ArtifactReader, ArtifactState};
use crate::scheduler::{CycleOutcome, MonitorEngine, Scheduler, Trigger};
use crate::schema::SchemaMap;
use crate::server::{run_server, AppState};
use crate::store::{SqliteOpener, StoreOpener};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn alert(s: &str) -> ColoredString  { s.truecolor(240, 110, 100) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "aegis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Input-distribution drift monitor for deployed classifiers")]
#[command(long_about = None)]
pub struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "AEGIS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run detection cycles on a fixed interval until ctrl+c
    Run {
        /// Also serve the HTTP API
        #[arg(long)]
        serve: bool,
    },

    /// Run a single detection cycle now
    Check,

    /// Show whether the published verdict is fresh, stale or missing
    Status,

    /// Validate configuration, reference and store mapping, then exit
    Validate,

    /// Replay a CSV into the store as simulated prediction traffic
    Simulate {
        /// Source CSV in reference layout
        #[arg(short, long)]
        source: PathBuf,

        /// Canonical feature to skew once drift starts
        #[arg(long, default_value = "mean radius")]
        drift_feature: String,

        /// Rows emitted before the skew starts
        #[arg(long, default_value = "50")]
        drift_after: usize,

        /// Milliseconds between rows
        #[arg(long, default_value = "500")]
        tick_ms: u64,

        /// Stop after this many rows
        #[arg(long)]
        limit: Option<usize>,

        /// Seed for the skew factor
        #[arg(long)]
        seed: Option<u64>,
    },
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    Ok(MonitorConfig::load(path)?)
}

fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Flip the shutdown flag on ctrl+c
fn spawn_ctrl_c(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for ctrl+c");
            return;
        }
        let _ = tx.send(true);
    });
}

fn bootstrap(config: MonitorConfig) -> anyhow::Result<MonitorEngine> {
    step_run("Loading reference and validating schema");
    let start = Instant::now();
    let opener: Arc<dyn StoreOpener> = Arc::new(SqliteOpener::from_config(&config.store));
    let engine = match MonitorEngine::bootstrap(config, opener) {
        Ok(engine) => engine,
        Err(e) => {
            println!("{}", alert("failed"));
            return Err(e.into());
        }
    };
    step_done(&format!(
        "{} reference rows, {} features in {:?}",
        engine.reference().len(),
        engine.reference().features().len(),
        start.elapsed()
    ));
    Ok(engine)
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Completed {
            dataset_drifted,
            drift_share,
            drifted_features,
            inconclusive_count,
            window_rows,
            artifact,
        } => {
            let headline = if *dataset_drifted {
                alert("DRIFT DETECTED")
            } else {
                ok("no drift")
            };
            println!();
            println!("  {:<16} {}", muted("Verdict"), headline.bold());
            println!("  {:<16} {:.4}", muted("Drift share"), drift_share);
            println!("  {:<16} {}", muted("Window rows"), window_rows);
            if !drifted_features.is_empty() {
                println!("  {:<16} {}", muted("Drifted"), drifted_features.join(", ").white());
            }
            if *inconclusive_count > 0 {
                println!("  {:<16} {}", muted("Inconclusive"), inconclusive_count.to_string().yellow());
            }
            println!("  {:<16} {}", muted("Artifact"), artifact.display());
        }
        CycleOutcome::Skipped { reason } => {
            println!();
            println!("  {:<16} {}", muted("Skipped"), reason.yellow());
        }
        CycleOutcome::Failed { kind, error } => {
            println!();
            println!("  {:<16} {} {}", muted("Failed"), alert(kind), error);
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_run(config_path: Option<&Path>, serve: bool) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if serve {
        config.server.enabled = true;
    }
    let settings = config.server.clone();
    let interval = config.scheduler.interval();

    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "Aegis drift monitor".white().bold()));
    line_box_center(&format!("{}", dim(&format!("v{}", env!("CARGO_PKG_VERSION")))));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("Store    ", &config.store.path.display().to_string()));
    line_box(&kv("Reference", &config.reference.path.display().to_string()));
    line_box(&kv("Reports  ", &config.artifacts.dir.display().to_string()));
    line_box(&kv("Interval ", &format!("{}s", interval.as_secs())));
    line_box(&kv("Policy   ", &config.dataset_policy().to_string()));
    if settings.enabled {
        line_box(&kv("API      ", &format!("http://{}:{}/api", settings.host, settings.port)));
    }
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box_center(&format!("{}", dim("ctrl+c to stop")));
    line_box_empty();
    line_box_bottom();
    println!();

    let engine = bootstrap(config)?;
    let scheduler = Arc::new(Scheduler::new(engine));

    let (tx, rx) = shutdown_channel();
    spawn_ctrl_c(tx);

    let server = if settings.enabled {
        let state = Arc::new(AppState::new(Arc::clone(&scheduler)));
        let rx = rx.clone();
        Some(tokio::spawn(async move { run_server(state, &settings, rx).await }))
    } else {
        None
    };

    scheduler.run(rx).await;

    if let Some(handle) = server {
        handle.await??;
    }

    let stats = scheduler.stats();
    section("Summary");
    println!("  {:<16} {}", muted("Cycles"), stats.total_cycles);
    println!("  {:<16} {}", muted("Completed"), stats.completed);
    println!("  {:<16} {}", muted("Skipped"), stats.skipped);
    println!("  {:<16} {}", muted("Failed"), stats.failed);
    println!();
    Ok(())
}

pub async fn cmd_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    section("Check");

    let config = load_config(config_path)?;
    let reader = ArtifactReader::new(&config.artifacts);
    let engine = bootstrap(config)?;
    let scheduler = Scheduler::new(engine);

    step_run("Running detection cycle");
    let report = scheduler.trigger(Trigger::Manual).await;
    step_done(&format!("{}ms", report.duration_ms));

    print_outcome(&report.outcome);
    if report.is_completed() {
        if let Some(artifact) = reader.latest()? {
            println!();
            for line in render_text(&artifact).lines() {
                println!("  {}", dim(line));
            }
        }
    }
    println!();

    if let CycleOutcome::Failed { kind, error } = &report.outcome {
        anyhow::bail!("cycle failed ({}): {}", kind, error);
    }
    Ok(())
}

pub fn cmd_status(config_path: Option<&Path>) -> anyhow::Result<()> {
    section("Status");

    let config = load_config(config_path)?;
    let reader = ArtifactReader::new(&config.artifacts);
    let status = reader.status(chrono::Utc::now(), config.stale_after())?;

    let state = match status.state {
        ArtifactState::Missing => "missing".yellow(),
        ArtifactState::Fresh => ok("fresh"),
        ArtifactState::Stale => alert("stale"),
    };
    println!("  {:<16} {}", muted("Artifact"), reader.json_path().display());
    println!("  {:<16} {}", muted("State"), state.bold());
    if let (Some(generated_at), Some(age)) = (status.generated_at, status.age_secs) {
        println!("  {:<16} {} {}", muted("Generated"), generated_at.to_rfc3339(), dim(&format!("({}s ago)", age)));
    }
    if let Some(cycle_id) = status.cycle_id {
        println!("  {:<16} {}", muted("Cycle"), cycle_id);
    }
    if let (Some(drifted), Some(share)) = (status.dataset_drifted, status.drift_share) {
        let verdict = if drifted { alert("drifted") } else { ok("stable") };
        println!("  {:<16} {} {}", muted("Dataset"), verdict, dim(&format!("(share {:.4})", share)));
    }
    println!(
        "  {:<16} {}s",
        muted("Stale after"),
        config.stale_after().as_secs()
    );
    println!();
    Ok(())
}

pub fn cmd_validate(config_path: Option<&Path>) -> anyhow::Result<()> {
    section("Validate");

    let config = load_config(config_path)?;
    step_ok("Configuration is valid");

    let engine = bootstrap(config)?;
    step_ok(&format!("Store {} matches the mapping", engine.store_location()));
    step_ok(&format!("Reference digest {}", &engine.reference().digest()[..16]));

    println!();
    println!("  {:<20} {:<12} {:<10} {}", muted("Feature"), muted("Kind"), muted("Method"), muted("Rule"));
    println!("  {}", dim(&"─".repeat(56)));
    let detection = &engine.config().detection;
    for feature in engine.reference().features() {
        println!(
            "  {:<20} {:<12} {:<10} {}",
            feature.name,
            format!("{:?}", feature.kind).truecolor(140, 140, 140),
            detection.method_for(feature).as_str(),
            detection.rule_for(feature)
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_simulate(config_path: Option<&Path>, settings: SimulationSettings) -> anyhow::Result<()> {
    section("Simulate");

    let config = load_config(config_path)?;
    let schema = SchemaMap::new(
        config.schema.clone(),
        &config.store.timestamp_column,
        &config.store.ignored_columns,
    )?;

    step_run(&format!("Loading {}", settings.source.display()));
    let mut simulator = TrafficSimulator::new(&schema, &config.store, settings)?;
    step_done(&format!("→ {}", config.store.path.display()));
    println!("  {}", dim("ctrl+c to stop"));

    let (tx, rx) = shutdown_channel();
    spawn_ctrl_c(tx);

    let start = Instant::now();
    let emitted = simulator.run(rx).await?;
    println!();
    step_ok(&format!("{} rows written in {:?}", emitted, start.elapsed()));
    println!();
    Ok(())
}

pub fn simulation_settings(
    source: PathBuf,
    drift_feature: String,
    drift_after: usize,
    tick_ms: u64,
    limit: Option<usize>,
    seed: Option<u64>,
) -> SimulationSettings {
    SimulationSettings {
        source,
        drift_feature,
        drift_after,
        tick: Duration::from_millis(tick_ms),
        limit,
        seed,
    }
}

pub fn show_help() {
    section("Commands");

    let cmds: &[(&str, &str)] = &[
        ("aegis run", "Detection cycles on the configured interval"),
        ("aegis run --serve", "Same, plus the HTTP API"),
        ("aegis check", "One cycle now"),
        ("aegis status", "Freshness of the published verdict"),
        ("aegis validate", "Check config, reference and store mapping"),
        ("aegis simulate -s data.csv", "Replay traffic into the store"),
    ];

    for (cmd, desc) in cmds {
        println!("  {:<36} {}", cmd.white(), muted(desc));
    }

    section("Endpoints");

    let endpoints: &[(&str, &str)] = &[
        ("GET  /api/verdict", "Latest verdict JSON"),
        ("GET  /api/verdict/status", "Missing, fresh or stale"),
        ("GET  /api/report", "Narrative HTML report"),
        ("POST /api/cycles", "Trigger a cycle"),
        ("GET  /api/cycles/stats", "Cycle counters and timings"),
        ("GET  /api/alerts", "Alert history"),
    ];

    for (url, desc) in endpoints {
        println!("  {:<36} {}", url.truecolor(120, 170, 255), muted(desc));
    }

    println!();
}
