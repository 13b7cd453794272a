use std::env;
use std::net::SocketAddr;

use gateway::state::AppState;
use gw_core::{GatewayConfig, OnlineStatusBatcher};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = GatewayConfig::from_env();

    // No user-service is wired up yet (out of scope per the purpose
    // section); batches are logged so presence fan-out is still observable.
    let (downstream_tx, mut downstream_rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(batch) = downstream_rx.recv().await {
            tracing::debug!(batch_len = batch.len(), "online status batch ready for downstream delivery");
        }
    });
    let batcher = OnlineStatusBatcher::new(
        config.online_batcher_concurrency,
        config.online_merge_tick,
        256,
        downstream_tx,
        rand_shard_offset(),
    );

    let (control_tx, control_rx) = tokio::sync::mpsc::channel(1024);
    let state = AppState::new(config, batcher, control_tx);
    tokio::spawn(gateway::control::control_loop(state.clone(), control_rx));
    tokio::spawn(renewal_loop(state.clone()));

    let bind_addr = state.config.bind_addr.clone();
    let graceful_shutdown_budget = state.config.graceful_shutdown_budget;
    let router = gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(graceful_shutdown_budget, server).await {
        Ok(Ok(Ok(()))) => info!("gateway shut down gracefully"),
        Ok(Ok(Err(err))) => panic!("gateway server error: {err}"),
        Ok(Err(err)) => panic!("gateway server task panicked: {err}"),
        Err(_) => {
            tracing::warn!(budget = ?graceful_shutdown_budget, "graceful shutdown budget exceeded, forcing exit");
            std::process::exit(1);
        }
    }
}

/// Periodically re-derives presence for every recently-active user so the
/// downstream user-service's cached state never silently goes stale between
/// register/unregister events.
async fn renewal_loop(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.online_renewal_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let snapshot = gw_core::collect_renewal_snapshot(&state.buckets, state.config.online_renewal_interval);
        for update in snapshot {
            state.online_batcher.ingest(update);
        }
    }
}

fn rand_shard_offset() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
