use clap::{Parser, Subcommand};
use std::time::Duration;
use taskflow_core::config::AppConfig;
use taskflow_core::control_plane::{broadcast, Command};
use taskflow_core::store::wait_for_store;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: CliCommand,

    /// How long to wait for worker replies, seconds.
    #[arg(long, default_value = "3")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Ask every live worker to report in.
    Health,
    /// Force every worker's circuit breaker open.
    OpenBreaker,
    /// Force every worker's circuit breaker closed.
    CloseBreaker,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = AppConfig::from_env();
    tracing_subscriber::fmt().with_env_filter(config.monitoring.log_level.clone()).init();

    let store = wait_for_store(&config.redis, 5).await?;
    let command = match args.command {
        CliCommand::Health => Command::Health,
        CliCommand::OpenBreaker => Command::OpenBreaker,
        CliCommand::CloseBreaker => Command::CloseBreaker,
    };

    let replies = broadcast(&store, command, Duration::from_secs(args.timeout_secs)).await?;
    info!(command = command.as_str(), replies = replies.len(), "collected worker replies");
    for reply in replies {
        println!("{}: ok={} detail={}", reply.worker_id, reply.ok, reply.detail);
    }
    Ok(())
}
