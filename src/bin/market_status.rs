use std::path::PathBuf;
use std::str::FromStr;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;

use infra_keeper::config::Config;
use infra_keeper::ledger::{AlloyLedger, Ledger};
use infra_keeper::state::Phase;

/// Print the on-chain lifecycle state of one or more infra markets.
#[derive(Parser)]
#[command(name = "market_status")]
struct Cli {
    #[arg(long, env = "KEEPER_CONFIG", default_value = "keeper.toml")]
    config: PathBuf,

    /// Trading addresses to inspect
    #[arg(required = true)]
    markets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::from_env()
    };
    let settings = config.validate()?;
    let ledger = AlloyLedger::connect(&settings)?;

    for raw in &cli.markets {
        let market = Address::from_str(raw).with_context(|| format!("bad address {raw}"))?;
        let status = match ledger.status(market).await {
            Ok(s) => s,
            Err(e) => {
                println!("{market}: status failed: {e}");
                continue;
            }
        };
        println!(
            "{market}: {} ({}s remaining)",
            status.phase, status.seconds_remaining
        );

        let epoch = ledger.epoch_number(market).await?;
        println!("  epoch:  {epoch}");
        if status.phase >= Phase::Sweeping {
            let winner = ledger.winner(market).await?;
            println!("  winner: {winner}");
        }
    }
    Ok(())
}
