mod events;
mod live;
mod output;
mod relay_sim;
mod scenario_channel_state;
mod scenario_coalesce;
mod scenario_common;
mod scenario_outage;
mod scenario_runner;
mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use walletsync_backup::{BackupCategory, WalletNetwork};

use crate::scenario_common::SimTimings;

#[derive(Parser)]
#[command(name = "walletsync-stress", about = "Stress test for the wallet backup engine")]
struct Cli {
    /// Also append JSONL events to a timestamped file in this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the in-process scenarios and report pass/fail.
    Scenarios,

    /// Randomized mutation bursts against an in-process relay that flaps.
    Simulate {
        /// Number of mutations.
        #[arg(long, default_value = "200")]
        mutations: u32,
        /// Number of relay outages.
        #[arg(long, default_value = "5")]
        flaps: u32,
        /// Debounce quiet period in ms.
        #[arg(long, default_value = "250")]
        debounce_ms: u64,
        /// Reconnect delay in ms.
        #[arg(long, default_value = "100")]
        reconnect_ms: u64,
        /// Time allowed for the final writes to land, in ms.
        #[arg(long, default_value = "3000")]
        settle_ms: u64,
        /// RNG seed (random if omitted).
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Drive a real relay over WebSocket.
    Live {
        /// Relay endpoint.
        #[arg(long)]
        relay: String,
        /// Wallet network.
        #[arg(long, default_value = "regtest")]
        network: WalletNetwork,
        /// Seed for the throwaway wallet identity.
        #[arg(long, default_value = "1")]
        identity_seed: u64,
        /// Persist the tracker here between runs.
        #[arg(long)]
        state_db: Option<PathBuf>,
        /// Category to mutate.
        #[arg(long, default_value = "settings")]
        category: BackupCategory,
        /// Number of mutations.
        #[arg(long, default_value = "10")]
        mutations: u32,
        /// Delay between mutations in ms.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    eprintln!("walletsync-stress v{}", env!("CARGO_PKG_VERSION"));

    let mode = match &cli.command {
        Command::Scenarios => "scenarios",
        Command::Simulate { .. } => "simulate",
        Command::Live { .. } => "live",
    };
    if let Some(dir) = &cli.output_dir {
        let path = output::resolve_jsonl_path(dir, mode)?;
        output::init_jsonl_writer(&path)?;
        eprintln!("JSONL: {}", path.display());
    }
    eprintln!();

    let ok = match cli.command {
        Command::Scenarios => scenario_runner::run().await?,

        Command::Simulate {
            mutations,
            flaps,
            debounce_ms,
            reconnect_ms,
            settle_ms,
            seed,
        } => {
            simulate::run(simulate::SimulateConfig {
                mutations,
                flaps,
                timings: SimTimings {
                    debounce: Duration::from_millis(debounce_ms),
                    reconnect_delay: Duration::from_millis(reconnect_ms),
                },
                settle: Duration::from_millis(settle_ms),
                seed: seed.unwrap_or_else(rand::random),
            })
            .await?
        }

        Command::Live {
            relay,
            network,
            identity_seed,
            state_db,
            category,
            mutations,
            interval_ms,
        } => {
            live::run(live::LiveConfig {
                relay,
                network,
                identity_seed,
                state_db,
                mutations,
                interval: Duration::from_millis(interval_ms),
                category,
            })
            .await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
