use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use infra_keeper::config::{Config, LoggingConfig};
use infra_keeper::controller::{ControllerSettings, MarketController};
use infra_keeper::heartbeat::Heartbeat;
use infra_keeper::keeper::Keeper;
use infra_keeper::ledger::{AlloyLedger, AlloySender, Ledger, TxBackend};
use infra_keeper::queue::{QueueSettings, TxQueue, TxQueueHandle};

#[derive(Parser)]
#[command(name = "infra-keeper", version, about = "Drives infra markets through their lifecycle")]
struct Cli {
    /// Path to the TOML config. Environment variables override it.
    #[arg(long, env = "KEEPER_CONFIG", default_value = "keeper.toml")]
    config: PathBuf,
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::from_env()
    };
    init_tracing(&config.logging);
    let settings = config.validate().context("invalid configuration")?;

    info!(
        "infra-keeper v{} starting, actor {}, infra market {}",
        env!("CARGO_PKG_VERSION"),
        settings.actor(),
        settings.infra_market
    );

    let ledger: Arc<dyn Ledger> = Arc::new(AlloyLedger::connect(&settings)?);
    let backend: Arc<dyn TxBackend> = Arc::new(AlloySender::connect(&settings)?);

    let queue = TxQueueHandle::new();
    let consumer = TxQueue::init(backend, &queue, QueueSettings::from(&settings))
        .await
        .context("reading actor nonce")?;

    let controller = MarketController::new(
        ledger.clone(),
        queue.clone(),
        ControllerSettings::from(&settings),
    );
    let keeper = Arc::new(Keeper::new(ledger, controller, settings.retry_interval));

    let consumer = tokio::spawn(consumer.run(keeper.shutdown_signal()));
    if let Some((url, interval)) = settings.heartbeat.clone() {
        tokio::spawn(Heartbeat::new(url, interval).run(keeper.shutdown_signal()));
    }

    tokio::select! {
        res = keeper.init() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted during start-up");
            keeper.destroy();
            return Ok(());
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
    keeper.destroy();
    let dropped = queue.flush();
    if dropped > 0 {
        info!(dropped, "undispatched intents discarded");
    }
    if let Err(e) = consumer.await {
        error!(error = %e, "tx queue task failed");
    }
    Ok(())
}
