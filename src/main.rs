//! Gateway binary: load config, snapshot the catalog, install the DDL
//! watch, serve. Exit codes: 0 clean shutdown, 1 initialization failure,
//! 2 configuration error.

use pghatch::config::LogFormat;
use pghatch::{app_router, watch, AppState, GatewayConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match GatewayConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pghatch=info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Err(e) = serve(config).await {
        tracing::error!(error = %e, "initialization failed");
        std::process::exit(1);
    }
}

async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind.clone();

    let state = AppState::connect(config).await?;
    watch::install(&state.pool).await?;
    watch::spawn(state.clone());

    let set = state.current();
    tracing::info!(
        mounted = set.mounted_count(),
        relations = set.model.relations.len(),
        callables = set.model.callables.len(),
        "gateway ready"
    );
    drop(set);

    let app = app_router(state);
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
