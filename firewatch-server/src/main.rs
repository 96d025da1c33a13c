use std::sync::Arc;

use clap::Parser;
use firewatch_core::{Detector, FirewatchConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use firewatch_server::http::{self, HttpState};
use firewatch_server::state::MonitorState;
use firewatch_server::subsystems::annotate::Annotator;
use firewatch_server::subsystems::{capture, retention, sources};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "firewatch.toml")]
    config: String,

    /// Check the database and exit.
    #[arg(long)]
    health: bool,
}

/// RUST_LOG wins over `[service] log_level`; an unset, empty or unparsable
/// RUST_LOG falls back to the configured level.
fn log_filter(rust_log: Option<&str>, default_level: &str) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match FirewatchConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let rust_log = std::env::var("RUST_LOG").ok();
    fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), &config.service.log_level))
        .init();

    let pool = match firewatch_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match firewatch_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Firewatch DB health check passed");
        return Ok(());
    }

    firewatch_core::db::init_schema(&pool).await?;

    let detector: Arc<dyn Detector> = match firewatch_core::create_detector(&config.detector) {
        Ok(d) => Arc::from(d),
        Err(e) => {
            eprintln!("Failed to create detector: {}", e);
            eprintln!("Set [detector] backend = \"none\" to stream without detection.");
            std::process::exit(1);
        }
    };
    tracing::info!(backend = detector.name(), "Detector ready");

    let monitor = Arc::new(MonitorState::new(&config.camera, &config.events));
    let annotator = Arc::new(Annotator::new(detector, &config.detector));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();
    let shutdown_monitor = Arc::clone(&monitor);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown_monitor.close();
        let _ = shutdown_tx.send(());
    });

    // Capture loop
    let source = sources::create_source(&config.camera);
    tokio::spawn(capture::run_capture_loop(
        source,
        Arc::clone(&monitor),
        config.camera.clone(),
        tx.subscribe(),
    ));

    // Retention worker
    if config.retention.enabled {
        tokio::spawn(retention::run_retention_loop(
            pool.clone(),
            config.retention.clone(),
            tx.subscribe(),
        ));
    }

    let state = Arc::new(HttpState {
        pool: pool.clone(),
        config,
        monitor: Arc::clone(&monitor),
        annotator,
    });
    http::start_http_server(state, tx.subscribe()).await?;

    // Close a session left open by a shutdown mid-capture
    if let Err(e) = monitor.stop(&pool).await {
        tracing::warn!("Failed to close active session on shutdown: {}", e);
    }
    pool.close().await;

    Ok(())
}
