//! queue-tester: push a batch through a worker pool and report how it went.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use queue_pool::broker::{Broker, MemoryBroker};
use queue_pool::config::Config;
use queue_pool::harness::Runner;
use queue_pool::telemetry::{TelemetryConfig, init_telemetry};
use queue_pool::worker::WorkerKind;

#[derive(Parser)]
#[command(
    name = "queue-tester",
    about = "Measure worker pool throughput between two topic exchanges"
)]
struct Cli {
    /// Number of work items to publish
    num_messages: u64,
    /// Consumer pool size
    pool_size: usize,
    /// PublisherWorker|SharedPublisherWorker|PooledPublisherWorker
    worker: String,
    /// Publisher pool size for PooledPublisherWorker
    #[arg(long)]
    publisher_pool_size: Option<usize>,
    /// Give up waiting after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Upper bound between checks of the finished-message counters
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// TOML file with exchange, queue and routing-key names
    #[arg(long)]
    topology: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(size) = cli.publisher_pool_size {
        config.publisher_pool_size = size;
    }
    if let Some(secs) = cli.timeout_secs {
        config.wait_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval = std::time::Duration::from_millis(ms);
    }
    if cli.topology.is_some() {
        config.topology = cli.topology.clone();
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "queue-tester".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if cli.pool_size < 2 {
        println!("Pool size must be >= 2");
    }
    println!(
        "Publishing {} messages with pool_size: {}",
        cli.num_messages, cli.pool_size
    );

    let kind: WorkerKind = match cli.worker.parse() {
        Ok(kind) => kind,
        Err(e) => {
            println!("Unknown test class: {}", cli.worker);
            return Err(e.into());
        }
    };

    let runner_config = config.runner_config(cli.pool_size)?;
    println!("Consume opts: {}", runner_config.topology.start_binding());
    println!("Publish opts: {}", runner_config.topology.finished_binding());

    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let runner = Runner::new(broker, kind, runner_config).await?;

    println!("Starting Tests...");
    let outcome = runner.run_test(cli.num_messages).await;
    runner.shutdown().await;

    let report = outcome?;
    println!("{report}");
    Ok(())
}
