use anyhow::{bail, Context, Result};
use citypulse_pipeline::batch::{
    jobs::{DailyRollupJob, HourlyRollupJob, PeakHourAnalysisJob},
    BatchScheduler, JobContext,
};
use citypulse_pipeline::bus::{BusSettings, MessageBus, PartitionedBus};
use citypulse_pipeline::config::AppConfig;
use citypulse_pipeline::ingestion::{IngestionPoller, PollerSettings};
use citypulse_pipeline::ops::{metrics, run_ops_server, HealthState, OpsState};
use citypulse_pipeline::speed::{eviction_task, SpeedProcessor};
use citypulse_pipeline::store::{PipelineStore, SqliteStore};
use citypulse_pipeline::upstream::HttpUpstreamFeeds;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Invalid configuration refuses to run.
    let config = AppConfig::from_env().context("Invalid configuration")?;

    info!("Starting CityPulse pipeline");
    info!(
        locations = config.locations.len(),
        poll_interval_secs = config.poll_interval.as_secs(),
        topic = %config.bus_topic,
        "Configuration loaded"
    );

    metrics::init_metrics();

    info!("Opening pipeline database at {:?}", config.database_path);
    let store: Arc<dyn PipelineStore> = Arc::new(SqliteStore::new(&config.database_path)?);

    let bus: Arc<dyn MessageBus> = Arc::new(PartitionedBus::new(BusSettings {
        topic: config.bus_topic.clone(),
        partitions: config.bus_partitions,
        ..BusSettings::default()
    }));

    let health = Arc::new(HealthState::new(
        config.poll_interval,
        config.eviction_interval,
    ));

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    // Speed layer: one consumer worker per partition.
    let processor = Arc::new(SpeedProcessor::new(
        Arc::clone(&store),
        config.local_offset,
        config.peak_hours_local.clone(),
    ));
    let consumer_handles = bus
        .subscribe(
            &config.bus_topic,
            &config.bus_consumer_group,
            processor,
            shutdown.child_token(),
        )
        .context("Failed to attach speed-layer consumer")?;
    for handle in consumer_handles {
        tasks.push(("speed-consumer", handle));
    }

    // Realtime-set maintenance.
    tasks.push((
        "realtime-eviction",
        tokio::spawn(eviction_task(
            Arc::clone(&store),
            config.realtime_retention,
            config.eviction_interval,
            Arc::clone(&health),
            shutdown.child_token(),
        )),
    ));

    // Ingestion poller.
    let feeds = Arc::new(HttpUpstreamFeeds::new(
        config.tomtom_api_key.clone(),
        config.aqicn_token.clone(),
    ));
    let poller = IngestionPoller::new(
        PollerSettings::from_config(&config),
        feeds,
        Arc::clone(&bus),
        Arc::clone(&store),
        config.locations.clone(),
        config.local_offset,
        config.peak_hours_local.clone(),
        Arc::clone(&health),
    );
    tasks.push(("ingestion-poller", tokio::spawn(poller.run(shutdown.child_token()))));

    // Batch scheduler.
    let job_context = JobContext::new(
        Arc::clone(&store),
        config.local_offset,
        config.peak_hours_local.clone(),
        shutdown.child_token(),
    );
    let mut scheduler = BatchScheduler::new(job_context, config.batch_run_on_startup);
    scheduler.register_job(Arc::new(HourlyRollupJob::new(config.batch_hourly_minute)));
    scheduler.register_job(Arc::new(DailyRollupJob::new(config.batch_daily_hour_local)));
    scheduler.register_job(Arc::new(PeakHourAnalysisJob::new(
        config.batch_peak_hour_local,
    )));
    tasks.push(("batch-scheduler", tokio::spawn(scheduler.run())));

    // Operational surface.
    let ops_state = OpsState {
        health: Arc::clone(&health),
        store: Arc::clone(&store),
        bus: Arc::clone(&bus),
    };
    let ops_port = config.ops_port;
    let ops_cancel = shutdown.child_token();
    tasks.push((
        "ops-server",
        tokio::spawn(async move {
            if let Err(e) = run_ops_server(ops_state, ops_port, ops_cancel).await {
                error!("Ops server terminated: {:#}", e);
            }
        }),
    ));

    info!("All pipeline tasks started");

    // Wait for a shutdown signal or for any core task to die. A task dying
    // outside shutdown is an invariant violation: exit so the supervisor
    // restarts the process.
    let mut died: Option<&'static str> = None;
    {
        let task_waits = tasks
            .iter_mut()
            .map(|(name, handle)| {
                let name = *name;
                Box::pin(async move {
                    let _ = handle.await;
                    name
                })
            })
            .collect::<Vec<_>>();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            (name, _, _) = futures::future::select_all(task_waits) => {
                error!("Task {} terminated unexpectedly", name);
                died = Some(name);
            }
        }
    }

    // Cooperative shutdown: stop accepting new cycles and triggers, give
    // in-flight work the grace period, then enforce the hard deadline.
    shutdown.cancel();
    let drain = async {
        for (name, handle) in tasks {
            if handle.is_finished() {
                continue;
            }
            if tokio::time::timeout(config.shutdown_grace, handle).await.is_err() {
                warn!("Task {} did not stop within the grace period", name);
            }
        }
    };
    if tokio::time::timeout(config.shutdown_deadline, drain)
        .await
        .is_err()
    {
        warn!("Hard shutdown deadline reached, terminating");
    }

    if let Some(name) = died {
        bail!("core task {} terminated unexpectedly", name);
    }
    info!("CityPulse pipeline stopped");
    Ok(())
}
