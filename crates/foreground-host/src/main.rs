// foreground-host: driver for the foreground instance registry
//
// Wires a registry, correlation table and launcher to an in-process platform
// event loop, then runs scripted exchanges or a token-minting stress run.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use foreground_host::scenario::{self, Scenario};
use foreground_host::{config, host::Host};

#[derive(Parser)]
#[command(name = "foreground-host", about = "Driver for the foreground instance registry")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scripted exchange, or all of them
    Scenario {
        #[arg(value_enum)]
        name: Option<Scenario>,
    },
    /// Mint tokens from several threads at once and check they are distinct
    Stress {
        /// Number of registering threads
        #[arg(short, long, default_value = "2")]
        threads: usize,

        /// Registrations per thread
        #[arg(short, long, default_value = "10000")]
        per_thread: usize,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Scenario { name } => {
            let mut host = Host::new(config.launcher.clone());
            host.start()?;
            let home = host.open_screen("home");

            let scenarios = match name {
                Some(one) => vec![one],
                None => Scenario::all().to_vec(),
            };
            println!("{:<14} {:<40} {:>10} {:>11}", "Scenario", "Outcome", "Registered", "Outstanding");
            println!("{}", "-".repeat(78));
            for s in scenarios {
                let report = scenario::run_scenario(&host, s).await;
                println!(
                    "{:<14} {:<40} {:>10} {:>11}",
                    report.scenario,
                    serde_json::to_string(&report.outcome)?,
                    report.registered,
                    report.outstanding
                );
            }

            tracing::info!(screen = home.name(), "closing host");
            host.shutdown()?;
        }
        Commands::Stress {
            threads,
            per_thread,
        } => {
            let host = Host::new(config.launcher.clone());
            let distinct = scenario::stress_tokens(&host, threads, per_thread)?;
            let expected = threads * per_thread;
            println!("{} tokens minted, {} distinct", expected, distinct);
            if distinct != expected {
                anyhow::bail!("token collision: {} of {} distinct", distinct, expected);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
