//! `relay`: command-line launcher for the Relay application broker.
//!
//! Boots an in-process application manager with the bundled demo
//! applications and runs one application URL until it quits.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;
use relay_kernel::config::load_config;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    init_tracing_stderr(&level);

    match cli.command {
        Commands::Run { url, args } => cmd::run::cmd_run(&config, &url, args),
        Commands::List { json } => cmd::system::cmd_list(json),
        Commands::Config => cmd::system::cmd_config(&config, cli.config.as_deref()),
    }
}
