use execute_gateway::app::{AppState, build_router};
use execute_gateway::config::environment::AppConfig;
use execute_gateway::infra::init_infra;
use execute_gateway::service::health_service;
use execute_gateway::service::provider_service::EthersConnector;
use execute_gateway::service::wallet_service;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    if let Err(e) = wallet_service::verify_private_key(config.private_key.as_deref()) {
        error!(error = %e, "signing key check failed");
        std::process::exit(1);
    }

    let infra = match init_infra(&config) {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "infra init failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = health_service::await_ready(
        infra.queue.as_ref(),
        config.redis_ready_max_retries,
        Duration::from_millis(config.redis_ready_interval_ms),
    )
    .await
    {
        error!(error = %e, "queue backend unavailable; refusing to start");
        infra.shutdown().await;
        std::process::exit(1);
    }

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            infra.shutdown().await;
            std::process::exit(1);
        }
    };

    info!(
        env = %config.rust_env,
        host = %config.api_host,
        port = config.api_port,
        queue_backend = config.queue_backend.as_str(),
        queue = %config.queue_name,
        probe_window_ms = config.probe_window_ms,
        "execute-gateway started"
    );

    let state = AppState::new(config, infra.clone(), Arc::new(EthersConnector));
    let app = build_router(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    infra.shutdown().await;
    if let Err(e) = served {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
    info!("execute-gateway stopped");
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm handler failed");
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
