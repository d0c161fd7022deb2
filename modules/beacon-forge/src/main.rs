use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use beacon_common::{ForgeConfig, Shutdown, ShutdownSignal};
use beacon_forge::breaker::CircuitBreaker;
use beacon_forge::deadletter::DeadLetterStore;
use beacon_forge::etl::EtlKicker;
use beacon_forge::health::HealthProbe;
use beacon_forge::listener::PipeListener;
use beacon_forge::ops::{self, OpsState};
use beacon_forge::pipeline::arbitrage::{CulturalData, CulturalEnricher};
use beacon_forge::pipeline::bot_ua::BotUaEnricher;
use beacon_forge::pipeline::contradiction::ContradictionEnricher;
use beacon_forge::pipeline::cross_customer::CrossCustomerEnricher;
use beacon_forge::pipeline::dead_internet::{DeadInternetEnricher, DeadInternetIndex};
use beacon_forge::pipeline::device_age::DeviceAgeEnricher;
use beacon_forge::pipeline::gpu_tier::{GpuTables, GpuTierEnricher};
use beacon_forge::pipeline::ip_api::IpApiEnricher;
use beacon_forge::pipeline::lead_score::LeadScoreEnricher;
use beacon_forge::pipeline::maxmind::MaxmindEnricher;
use beacon_forge::pipeline::rdns::RdnsEnricher;
use beacon_forge::pipeline::replay::{ReplayEnricher, ReplayTracker};
use beacon_forge::pipeline::session::SessionEnricher;
use beacon_forge::pipeline::ua_parser::UaParserEnricher;
use beacon_forge::pipeline::whois::WhoisEnricher;
use beacon_forge::sweeper::FailoverSweeper;
use beacon_forge::writer::BulkWriter;
use beacon_forge::Pipeline;
use beacon_warehouse::WarehouseClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ForgeConfig::from_env();

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "forge.log");
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

    info!("Beacon forge starting...");
    config.log_redacted();

    let (shutdown, signal) = Shutdown::new();
    shutdown.listen_for_signals();

    let warehouse = WarehouseClient::connect(&config.database_url).await?;
    let breaker = Arc::new(CircuitBreaker::new(
        config.breaker_cooldown_secs,
        config.breaker_max_backoff_secs,
    ));

    // Channels: pipe/sweeper -> enrichment -> bulk writer.
    let (enrich_tx, enrich_rx) = mpsc::channel(config.enrich_capacity);
    let (sql_tx, sql_rx) = mpsc::channel(config.enrich_capacity);

    // Stateful classifiers shared with the background sweep task.
    let gpu_tables = Arc::new(GpuTables::load(config.gpu_tables_path.as_deref()));
    let replay_tracker = Arc::new(ReplayTracker::new());
    let dead_index = Arc::new(DeadInternetIndex::new());
    let sessions = Arc::new(SessionEnricher::new(config.session_timeout_secs));
    let cross_customer = Arc::new(CrossCustomerEnricher::new(
        config.cross_customer_window_secs,
    ));

    let ip_api = Arc::new(IpApiEnricher::new(
        config.ipapi_base_url.clone(),
        config.ipapi_key.clone(),
        config.ipapi_per_minute,
        warehouse.clone(),
    ));
    ip_api.load_known_ips().await;
    ip_api.spawn_refill_loop(shutdown.subscribe());

    // The classifier chain, in its fixed order.
    let pipeline = Arc::new(Pipeline::new(vec![
        Box::new(BotUaEnricher),
        Box::new(UaParserEnricher::new()),
        Box::new(RdnsEnricher::new(config.cloud_hostnames_path.as_deref())),
        Box::new(MaxmindEnricher::new(
            config.mmdb_path.as_deref(),
            config.mmdb_asn_path.as_deref(),
        )),
        Box::new(ip_api.clone()),
        Box::new(WhoisEnricher::new(config.whois_host.clone())),
        Box::new(cross_customer.clone()),
        Box::new(sessions.clone()),
        Box::new(GpuTierEnricher::new(gpu_tables.clone())),
        Box::new(CulturalEnricher::new(CulturalData::load(
            config.cultural_data_path.as_deref(),
        ))),
        Box::new(DeviceAgeEnricher::new(gpu_tables)),
        Box::new(ContradictionEnricher),
        Box::new(ReplayEnricher::new(replay_tracker.clone())),
        Box::new(DeadInternetEnricher::new(dead_index.clone())),
        Box::new(LeadScoreEnricher),
    ]));
    info!(enrichers = pipeline.len(), "Enrichment pipeline assembled");

    // Pipe listener instances and the failover sweeper feed the same channel.
    PipeListener::new(
        config.socket_path(),
        config.pipe_instances,
        enrich_tx.clone(),
        shutdown.subscribe(),
    )
    .spawn()?;
    tokio::spawn(
        FailoverSweeper::new(
            config.failover_dir.clone(),
            config.scan_interval_secs,
            enrich_tx.clone(),
            shutdown.subscribe(),
        )
        .run(),
    );
    drop(enrich_tx);

    spawn_enrichment_task(pipeline, enrich_rx, sql_tx, shutdown.subscribe());
    spawn_state_sweeper(
        replay_tracker,
        sessions,
        cross_customer,
        dead_index,
        shutdown.subscribe(),
    );

    let writer_task = tokio::spawn(
        BulkWriter::new(
            warehouse.clone(),
            sql_rx,
            breaker.clone(),
            DeadLetterStore::new(&config.deadletter_dir),
            config.batch_size,
            config.bulk_timeout_secs,
            &config.retry_delays_secs,
            config.drain_timeout_secs,
            shutdown.subscribe(),
        )
        .run(),
    );

    tokio::spawn(
        EtlKicker::new(
            warehouse.clone(),
            config.etl_procedures.clone(),
            config.etl_interval_secs,
            shutdown.subscribe(),
        )
        .run(),
    );

    let probe = Arc::new(HealthProbe::new(
        warehouse,
        breaker.clone(),
        config.edge_queue_depth_url.clone(),
        config.probe_endpoints.clone(),
        config.log_dir.clone(),
    ));
    let router = ops::build_router(OpsState { probe, breaker });
    let addr = format!("{}:{}", config.ops_host, config.ops_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Ops endpoint listening");

    let mut serve_signal = signal.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_signal.recv().await })
    .await?;

    // The writer drains the sql channel up to its deadline.
    writer_task.await?;
    info!("Beacon forge stopped");
    Ok(())
}

/// The single enrichment consumer: one record at a time through the chain,
/// then on to the writer channel.
fn spawn_enrichment_task(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<beacon_common::CaptureRecord>,
    tx: mpsc::Sender<beacon_common::CaptureRecord>,
    mut shutdown: ShutdownSignal,
) {
    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                record = rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
                _ = shutdown.recv() => break,
            };
            let enriched = pipeline.run(record).await;
            if tx.send(enriched).await.is_err() {
                warn!("Writer channel closed, stopping enrichment");
                break;
            }
        }
        info!("Enrichment task stopped");
    });
}

/// Periodic eviction across the stateful classifiers.
fn spawn_state_sweeper(
    replay: Arc<ReplayTracker>,
    sessions: Arc<SessionEnricher>,
    cross_customer: Arc<CrossCustomerEnricher>,
    dead_index: Arc<DeadInternetIndex>,
    mut shutdown: ShutdownSignal,
) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(600);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let now = chrono::Utc::now();
                    replay.sweep(now);
                    sessions.sweep(now);
                    cross_customer.sweep(now);
                    dead_index.sweep(now);
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}
