use std::{env, sync::Arc};

use objstore_bench::{BenchConfig, Driver};
use objstore_client::{ThrottledClient, build_service};
use overload_throttle::throttle::Throttle;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info";
/// Directory for an additional daily-rolling log file.
const ENV_LOG_DIR: &str = "BENCH_LOG_DIR";

fn init_tracing() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "objstore_bench.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<(), objstore_bench::Error> {
    let dotenv = dotenvy::dotenv();
    let _guard = init_tracing();
    match dotenv {
        Ok(path) => info!(path = %path.display(), ".env file loaded."),
        Err(_) => debug!("No .env file found, using environment variables and defaults."),
    }

    let config = BenchConfig::from_env()?;
    info!(target: "config_final", ?config, "Benchmark configuration loaded.");

    let service = build_service(&config.store_config())?;
    let throttle = Arc::new(Throttle::new(config.throttle_settings()));
    let client = ThrottledClient::new(service, throttle).with_acl(config.acl.clone());

    let summary = Driver::new(config, client).run().await;

    info!(
        submitted = summary.submitted,
        completed = summary.completed,
        failed = summary.failed,
        pending = summary.pending,
        ceiling = summary.ceiling,
        "{}",
        summary
    );
    Ok(())
}
