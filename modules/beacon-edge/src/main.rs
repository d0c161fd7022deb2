use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use beacon_common::{EdgeConfig, Shutdown};
use beacon_edge::journal::JournalWriter;
use beacon_edge::pipe::PipeWriter;
use beacon_edge::routes;
use beacon_edge::EdgeState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EdgeConfig::from_env();

    // Console plus a non-blocking day-rolling file; the guard must outlive main.
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "edge.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("beacon=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    info!("Beacon edge starting...");

    let state = Arc::new(EdgeState::new(config.clone())?);
    let (shutdown, signal) = Shutdown::new();
    shutdown.listen_for_signals();

    // Weekly datacenter-range refresh and periodic cache/window sweeps.
    state.classifiers.datacenter.spawn_refresh_loop(
        config.datacenter_refresh_secs,
        shutdown.subscribe(),
    );
    spawn_sweeper(state.clone(), shutdown.subscribe());

    // The single queue consumer; sole owner of the pipe client handle.
    let writer = PipeWriter::new(
        config.socket_path(),
        config.pipe_retry_secs,
        state.queue.clone(),
        JournalWriter::new(&config.failover_dir),
        shutdown.subscribe(),
    );
    let writer_task = tokio::spawn(writer.run());

    let router = routes::build_router(state.clone());
    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Capture endpoint listening");

    let mut serve_signal = signal.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_signal.recv().await })
    .await?;

    // Let the writer finish its final drain before exiting.
    writer_task.await?;
    info!("Beacon edge stopped");
    Ok(())
}

fn spawn_sweeper(state: Arc<EdgeState>, mut shutdown: beacon_common::ShutdownSignal) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(600);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let now = chrono::Utc::now();
                    state.classifiers.stability.sweep(now);
                    state.classifiers.velocity.sweep(now);
                    state.classifiers.geo.sweep(now);
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}
