//! Subcommands.

mod compile;
mod definition;
mod enqueue;
mod simulate;
mod validate;

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;
use serde::de::DeserializeOwned;

use self::compile::CompileFilterArgs;
use self::enqueue::EnqueueArgs;
use self::simulate::SimulateArgs;
use self::validate::ValidateArgs;

/// Operator subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate an automation definition (steps and graph).
    Validate(ValidateArgs),
    /// Compile filter groups to a Postgres WHERE fragment.
    CompileFilter(CompileFilterArgs),
    /// Run a scenario end to end against in-memory collaborators.
    Simulate(SimulateArgs),
    /// Publish one job to the NATS job stream.
    Enqueue(EnqueueArgs),
}

/// Runs a subcommand and prints its JSON report on stdout.
pub async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Validate(args) => print_json(&validate::run(&args)?),
        Command::CompileFilter(args) => print_json(&compile::run(&args)?),
        Command::Simulate(args) => print_json(&simulate::run(&args).await?),
        Command::Enqueue(args) => print_json(&enqueue::run(args).await?),
    }
}

/// Reads and decodes a JSON file; `-` reads stdin.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };

    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
