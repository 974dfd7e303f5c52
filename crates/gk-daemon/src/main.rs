//! gk-daemon entry point.
//!
//! Intentionally thin: parse the CLI, set up tracing, load configuration,
//! build the shared state, wire middleware, start the scheduler and the
//! HTTP server. All route handlers live in `routes.rs`; all shared state
//! lives in `state.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use clap::Parser;
use serde_json::json;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use gk_config::{load_layered_yaml, Settings};
use gk_daemon::{routes, state::AppState};
use gk_scheduler::ReportScheduler;

#[derive(Debug, Parser)]
#[command(name = "gk-daemon", about = "Safety-gated order-brokering service")]
struct Args {
    /// Configuration layers, merged in order (later files win).
    #[arg(long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing()?;

    let args = Args::parse();
    let mut settings = load_settings(&args)?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    let shared = AppState::build(settings).context("build application state")?;
    info!(
        env = shared.settings.env.as_str(),
        account = %shared.settings.account_id,
        "services wired"
    );

    // Nightly statistics snapshot keeps cross-restart continuity honest.
    let scheduler = ReportScheduler::new(Arc::clone(&shared.audit));
    {
        let stats = Arc::clone(&shared.stats);
        scheduler.register_job(
            "statistics-snapshot",
            "Nightly statistics snapshot",
            "0 0 * * *",
            Arc::new(move || {
                stats.save()?;
                let summary = stats.summary();
                Ok(json!({
                    "total_orders": summary.total_orders,
                    "orders_filled": summary.orders_filled,
                }))
            }),
        )?;
    }
    scheduler.start()?;

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = shared
        .settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {:?}", shared.settings.bind_addr))?;
    info!("gk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn load_settings(args: &Args) -> Result<Settings> {
    if args.config.is_empty() {
        let mut settings = Settings::default();
        settings.apply_env_overrides()?;
        return Ok(settings);
    }
    let loaded = load_layered_yaml(&args.config)?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");
    Settings::from_config(&loaded.config_json)
}

/// `LOG_LEVEL` selects the filter; `LOG_FILE` redirects output to a file.
fn init_tracing() -> Result<()> {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("LOG_FILE") {
        Ok(path) => {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("create log directory")?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }
    Ok(())
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
