use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use http::{HeaderName, HeaderValue};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use aidstock as api;

const REQUEST_ID_HEADER: &str = "x-request-id";
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(name = "aidstock", version, about = "First-aid inventory API server")]
struct Args {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, default_value = api::config::CONFIG_DIR)]
    config_dir: PathBuf,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = api::config::load_config_from(&args.config_dir)
        .with_context(|| format!("loading configuration from {}", args.config_dir.display()))?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    if args.check_config {
        info!(environment = %cfg.environment, "configuration is valid");
        return Ok(());
    }

    api::metrics::init_metrics();
    api::handlers::health::init_start_time();

    let store: Arc<dyn api::store::DocumentStore> = Arc::new(api::store::InMemoryStore::new());
    let state = api::AppState::new(cfg.clone(), store).context("failed to build services")?;

    if let Some((name, pin)) = cfg.bootstrap_admin() {
        match state.staff.bootstrap_admin(name, pin).await {
            Ok(Some(admin)) => info!(staff_id = %admin.id, "created bootstrap administrator"),
            Ok(None) => info!("staff roster present; bootstrap administrator skipped"),
            Err(e) => error!(error = %e, "failed to create bootstrap administrator"),
        }
    }

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!(purged, "expired sessions removed");
            }
        }
    });

    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors_layer = if origins.is_empty() {
        info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let app = api::build_router(state)
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    let ip: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("aidstock listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
