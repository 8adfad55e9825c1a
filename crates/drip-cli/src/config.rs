//! Command-line configuration.
//!
//! ```text
//! Cli
//! ├── log_format: LogFormat      # text | json, on stderr
//! └── command: Command
//!     ├── validate               # step + graph validation of a definition
//!     ├── compile-filter         # filter groups to a SQL fragment
//!     ├── simulate               # scenario run on in-memory collaborators
//!     └── enqueue                # publish one job to the NATS stream
//! ```

use clap::{Parser, ValueEnum};

use crate::command::Command;

/// Drip automation engine tools.
#[derive(Debug, Parser)]
#[command(name = "drip")]
#[command(about = "Drip automation engine tools")]
#[command(version)]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Format of log lines written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Loads `.env` (if enabled) and parses the command line.
    ///
    /// `.env` is loaded first so clap's `env` fallbacks can see its values.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "drip",
            "--log-format",
            "json",
            "simulate",
            "scenario.json",
            "--wait-recheck-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.engine.wait_recheck_secs, 5);
        assert_eq!(args.engine.sweep_page_size, 75);
    }
}
