use autosrv::actions::ActionExecutor;
use autosrv::config::Config;
use autosrv::drivers::sim::SimBackend;
use autosrv::engine::{AutomationEngine, Scheduler};
use autosrv::routes::{create_routes, AppState};

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use summit_vars::VarStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run in service mode (scheduler + management API)
    Service,

    /// Run a fixed number of evaluation ticks and print engine status
    Tick {
        /// Number of ticks to run
        #[arg(default_value_t = 1)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(service = %config.service.name, "starting automation service");

    match args.command {
        Some(Commands::Service) | None => run_service(&config).await?,
        Some(Commands::Tick { count }) => run_ticks(&config, count).await?,
    }

    Ok(())
}

fn build_engine(config: &Config) -> Arc<AutomationEngine> {
    let vars = Arc::new(VarStore::new());
    // hardware seams default to simulators; real backends register here
    let sim = Arc::new(SimBackend::new());
    let executor = Arc::new(ActionExecutor::with_sim(vars.clone(), sim));
    Arc::new(AutomationEngine::new(
        vars,
        executor,
        config.engine_settings(),
    ))
}

fn load_snapshot(engine: &AutomationEngine, config: &Config) {
    if !config.snapshot.enabled {
        return;
    }
    let now_ms = chrono::Utc::now().timestamp_millis();
    match engine.vars().load_snapshot(&config.snapshot.path, now_ms) {
        Ok(count) if count > 0 => info!(count, path = %config.snapshot.path, "variables restored"),
        Ok(_) => {},
        Err(err) => warn!(error = %err, "variable snapshot load failed"),
    }
}

/// Register the rules and sources declared in the configuration file.
fn register_definitions(engine: &AutomationEngine, config: &Config) {
    if config.rules.is_empty() && config.sources.is_empty() {
        return;
    }
    let (rules, sources) =
        engine.load_definitions(config.rules.clone(), config.sources.clone());
    info!(rules, sources, "configured definitions registered");
}

fn save_snapshot(engine: &AutomationEngine, config: &Config) {
    if !config.snapshot.enabled {
        return;
    }
    if let Some(parent) = std::path::Path::new(&config.snapshot.path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match engine.vars().save_snapshot(&config.snapshot.path) {
        Ok(count) => info!(count, path = %config.snapshot.path, "variables saved"),
        Err(err) => warn!(error = %err, "variable snapshot save failed"),
    }
}

/// Run the automation service: evaluation scheduler plus management API.
async fn run_service(config: &Config) -> anyhow::Result<()> {
    let engine = build_engine(config);
    load_snapshot(&engine, config);
    register_definitions(&engine, config);

    let scheduler = Scheduler::new(engine.clone(), config.engine.tick_ms);
    scheduler.start();

    let state = Arc::new(AppState {
        engine: engine.clone(),
        started_at_ms: chrono::Utc::now().timestamp_millis(),
    });
    let app = create_routes(state);

    let addr = format!("0.0.0.0:{}", config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("management API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("shutting down");
    scheduler.stop().await;
    engine.shutdown().await;
    save_snapshot(&engine, config);
    Ok(())
}

/// One-shot evaluation, useful for inspecting rule behavior by hand.
async fn run_ticks(config: &Config, count: u32) -> anyhow::Result<()> {
    let engine = build_engine(config);
    load_snapshot(&engine, config);
    register_definitions(&engine, config);

    let interval = std::time::Duration::from_millis(config.engine.tick_ms);
    for i in 0..count {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let triggered = engine.tick(now_ms).await;
        info!(tick = i + 1, triggered, "tick complete");
        if i + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }

    engine.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&engine.status())?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed");
    }
}
