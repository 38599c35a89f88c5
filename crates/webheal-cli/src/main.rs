mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load();

    std::fs::create_dir_all(config.logs_dir()).ok();
    let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "webheal.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run(args, &config, cli.format).await,
        Commands::Templates => commands::templates(cli.format),
        Commands::Probe => commands::probe(cli.format).await,
    }
}
