use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use index_consolidator::{
    cluster::HttpClusterClient,
    config::{Config, QueueBackend},
    discovery::DiscoveryService,
    dispatcher::Dispatcher,
    error::AppError,
    planner::{encode_plan, encode_runner_client_config, PlanBuilder, PlanParams},
    queue::{
        InMemoryInflightRegistry, InMemoryQueue, InflightRegistry, RedisInflightRegistry,
        RedisQueue, TaskQueue,
    },
    runner::ProcessPlanRunner,
    worker::Worker,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "index-consolidator")]
#[command(about = "Consolidates daily search indices into monthly indices", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one dispatch cycle and exit
    Dispatch {
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Consume and execute consolidation tasks until interrupted
    Worker,

    /// Run the scheduled dispatcher and in-process workers
    Run,

    /// Print the plans a dispatch cycle would produce, without enqueueing
    Plan {
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config);

    tracing::info!("Starting index-consolidator v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Dispatch { date } => run_dispatch(config, date).await?,
        Commands::Worker => run_worker(config).await?,
        Commands::Run => run_combined(config).await?,
        Commands::Plan { date } => run_plan(config, date).await?,
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("index_consolidator={}", config.observability.log_level).into()
    });

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn build_discovery(config: &Config) -> Result<DiscoveryService, AppError> {
    let cluster = Arc::new(HttpClusterClient::new(&config.cluster)?);
    Ok(DiscoveryService::new(cluster, config.discovery.clone()))
}

async fn build_queue(
    config: &Config,
) -> Result<(Arc<dyn TaskQueue>, Arc<dyn InflightRegistry>), AppError> {
    match config.queue.backend {
        QueueBackend::Memory => Ok((
            InMemoryQueue::new(config.queue.max_attempts),
            InMemoryInflightRegistry::new(),
        )),
        QueueBackend::Redis => {
            let url = config.queue.redis_url.clone().ok_or_else(|| {
                AppError::Configuration(
                    "queue.redis_url must be set for the redis backend".to_string(),
                )
            })?;
            let queue = RedisQueue::new(&url, &config.queue).await?;
            let inflight = RedisInflightRegistry::new(&url, &config.queue.queue_name).await?;
            Ok((Arc::new(queue), Arc::new(inflight)))
        }
    }
}

async fn run_dispatch(config: Config, date: Option<NaiveDate>) -> Result<(), AppError> {
    let today = date.unwrap_or_else(|| Utc::now().date_naive());
    let discovery = build_discovery(&config)?;
    let (queue, inflight) = build_queue(&config).await?;

    let dispatcher = Dispatcher::new(discovery, queue, inflight, config);
    let summary = dispatcher.dispatch_cycle(today).await?;

    println!(
        "buckets={} enqueued={} suppressed={} errors={}",
        summary.buckets_discovered,
        summary.tasks_enqueued,
        summary.tasks_suppressed,
        summary.errors
    );
    Ok(())
}

async fn run_worker(config: Config) -> Result<(), AppError> {
    let (queue, inflight) = build_queue(&config).await?;
    let runner = ProcessPlanRunner::new(config.runner.clone());
    let worker = Worker::new(queue, inflight, runner, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

async fn run_combined(config: Config) -> Result<(), AppError> {
    let discovery = build_discovery(&config)?;
    let (queue, inflight) = build_queue(&config).await?;

    let dispatcher = Arc::new(Dispatcher::new(
        discovery,
        queue.clone(),
        inflight.clone(),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut workers = Vec::new();
    for i in 0..config.scheduler.workers.max(1) {
        let worker = Worker::new(
            queue.clone(),
            inflight.clone(),
            ProcessPlanRunner::new(config.runner.clone()),
            config.clone(),
        );
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            tracing::info!(worker = i, "Spawning worker");
            worker.run(rx).await;
        }));
    }

    if config.scheduler.enabled {
        let scheduler = tokio_cron_scheduler::JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create scheduler: {}", e)))?;

        let job_dispatcher = dispatcher.clone();
        let job = tokio_cron_scheduler::Job::new_async(
            config.scheduler.cron.as_str(),
            move |_uuid, _lock| {
                let dispatcher = job_dispatcher.clone();
                Box::pin(async move {
                    let today = Utc::now().date_naive();
                    if let Err(e) = dispatcher.dispatch_cycle(today).await {
                        tracing::error!(error = %e, "Scheduled dispatch cycle failed");
                    }
                })
            },
        )
        .map_err(|e| AppError::Internal(format!("Invalid cron expression: {}", e)))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to add dispatch job: {}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!(cron = %config.scheduler.cron, "Dispatch schedule active");
    } else {
        // One immediate cycle when scheduling is off, so `run` still does work
        dispatcher.dispatch_cycle(Utc::now().date_naive()).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to listen for shutdown: {}", e)))?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    futures::future::join_all(workers).await;
    Ok(())
}

/// Dry run: print each bucket's plan document to stdout
async fn run_plan(config: Config, date: Option<NaiveDate>) -> Result<(), AppError> {
    let today = date.unwrap_or_else(|| Utc::now().date_naive());
    let discovery = build_discovery(&config)?;
    let buckets = discovery.discover(today).await?;

    if buckets.is_empty() {
        println!("No consolidation-eligible buckets");
        return Ok(());
    }

    let params = PlanParams {
        shards: config.plan.shards,
        replicas: config.plan.replicas,
        reindex_slices: config.plan.reindex_slices,
        reindex_batch_size: config.plan.reindex_batch_size,
        retire_mode: config.plan.retire_mode,
    };
    let connection = (&config.cluster).into();

    let client_yaml = serde_yaml::to_string(&encode_runner_client_config(
        &connection,
        &config.runner.log_level,
    )?)?;
    println!("# client configuration\n{}", client_yaml);

    for bucket in buckets {
        let plan = PlanBuilder::build(&bucket, &params)?;
        let plan_yaml = serde_yaml::to_string(&encode_plan(&plan)?)?;
        println!(
            "# bucket {} ({} members)\n{}",
            plan.bucket_key,
            bucket.members.len(),
            plan_yaml
        );
    }
    Ok(())
}
