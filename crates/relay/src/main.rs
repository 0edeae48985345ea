use anyhow::Context;
use sketchsync_relay::{
    build_router,
    config::{LogFormat, RelayConfig},
    RelayState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    init_tracing(&config);

    let listen_addr = config.listen_addr;
    let state = RelayState::new(config);
    let reaper = state.reaper().spawn();
    let app = build_router(state.clone());

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {listen_addr}"))?;

    info!(
        listen_addr = %listen_addr,
        room_grace_secs = state.config.room_grace_period.as_secs(),
        reaper_interval_secs = state.config.reaper_interval.as_secs(),
        merge_strategy = ?state.config.merge_strategy,
        "starting sketchsync relay"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly");
    reaper.abort();
    served
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
