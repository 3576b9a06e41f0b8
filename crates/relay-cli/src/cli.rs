//! Clap CLI definitions for the `relay` launcher.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  relay list                                     List the bundled applications
  relay run mojo:echo_client                     Echo \"Hello World\" through mojo:echo_server
  relay run mojo:share_echo mojo:share_echo_target
                                                 Share echo services both ways
  relay config                                   Show the effective configuration";

/// Relay: run applications that broker services to each other.
#[derive(Parser)]
#[command(name = "relay", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.relay/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (overrides the config file).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an application and wait until it quits.
    Run {
        /// Application URL, e.g. mojo:echo_client.
        url: String,
        /// Arguments for the application; it receives [URL, ARGS...].
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List the bundled applications.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration as TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_trailing_args() {
        let cli = Cli::try_parse_from([
            "relay",
            "--log-level",
            "debug",
            "run",
            "mojo:share_echo",
            "mojo:share_echo_target",
            "--verbose",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run { url, args } => {
                assert_eq!(url, "mojo:share_echo");
                assert_eq!(args, vec!["mojo:share_echo_target", "--verbose"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_url() {
        assert!(Cli::try_parse_from(["relay", "run"]).is_err());
    }
}
