mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use commands::Command;
use offsync::config::Config;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first cache and write outbox for HTTP backends")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable: reads come from cache, writes are queued
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = offsync::logging::init(&config.logging)?;

  let client = commands::build_client(&config, !args.offline)?;
  commands::run(args.command, &client, &config).await
}
