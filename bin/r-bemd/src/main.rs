//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-BEM daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_bem_api::{spawn_api_server, ApiServer, ApiState};
use r_bem_common::config::AppConfig;
use r_bem_common::logging::init_tracing;
use r_bem_common::VERSION;
use r_bem_metrics::{new_registry, spawn_http_server, DaemonMetrics, SessionMetrics};
use r_bem_sim::{KpiRecord, ModelMetadata, SessionManager, SignalRegistry};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("R-BEM ", env!("CARGO_PKG_VERSION")),
    about = "R-BEM building emulation daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the test-case API until interrupted")]
    Serve,
    #[command(about = "Run the baseline scenario to its end and export results")]
    Run {
        #[arg(long, value_name = "DIR", default_value = "target/run")]
        output: PathBuf,
    },
    #[command(about = "Validate a signal exchange metadata document")]
    CheckMetadata {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::CheckMetadata { file }) = &cli.command {
        return check_metadata(file);
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();
    init_tracing("r-bemd", &config.logging)?;
    info!(
        source = %loaded.source.display(),
        scenario = %config.scenario.name,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, load_duration.as_secs_f64()).await,
        Commands::Run { output } => run_baseline(config, &output).await,
        Commands::CheckMetadata { .. } => Ok(()),
    }
}

async fn serve(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();
    let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
    daemon_metrics.set_build_info(VERSION, profile);

    let mut session = SessionManager::from_config(&config)?;
    let metrics_server = if config.metrics.enabled {
        session = session.with_metrics(SessionMetrics::new(registry.clone())?);
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };
    let session = Arc::new(session);

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(Arc::clone(&session)));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => api_server = Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!(scenario = %session.name(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct KpiExport<'a> {
    scenario: &'a str,
    steps: usize,
    kpis: Vec<KpiRecord>,
}

async fn run_baseline(config: AppConfig, output: &Path) -> Result<()> {
    let session = SessionManager::from_config(&config)?;
    session.reset(None).await?;
    let steps = session.run_to_end().await?;
    info!(steps, "baseline scenario finished");

    fs::create_dir_all(output)
        .with_context(|| format!("failed to create output directory {}", output.display()))?;

    let results_path = output.join("results.csv");
    let file = File::create(&results_path)
        .with_context(|| format!("failed to create {}", results_path.display()))?;
    session.write_results_csv(BufWriter::new(file))?;

    let kpis_path = output.join("kpis.json");
    let file = File::create(&kpis_path)
        .with_context(|| format!("failed to create {}", kpis_path.display()))?;
    let export = KpiExport {
        scenario: session.name(),
        steps,
        kpis: session.kpi_records(),
    };
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &export)
        .with_context(|| format!("failed to write {}", kpis_path.display()))?;
    writer.flush()?;

    for record in &export.kpis {
        println!("{:<12} {:>14.6} {}", record.name, record.value, record.unit);
    }
    info!(
        results = %results_path.display(),
        kpis = %kpis_path.display(),
        "baseline exported"
    );
    Ok(())
}

fn check_metadata(path: &Path) -> Result<()> {
    let metadata = ModelMetadata::from_path(path)?;
    let registry = SignalRegistry::from_metadata(&metadata)
        .with_context(|| format!("invalid signal exchange metadata in {}", path.display()))?;
    println!("inputs:");
    for input in registry.list_inputs() {
        println!(
            "  {} [{}, {}] {} (activation {})",
            input.name, input.min, input.max, input.unit, input.activation
        );
    }
    println!("outputs:");
    for output in registry.list_outputs() {
        println!("  {} {}", output.name, output.unit);
    }
    for (tag, members) in registry.kpi_groups() {
        println!("kpi group {tag}: {}", members.join(", "));
    }
    Ok(())
}
