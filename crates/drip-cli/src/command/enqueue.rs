//! `drip enqueue`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use drip_nats::NatsClient;
use drip_nats::NatsConfig;
use drip_nats::queue::{JobEnvelope, NatsJobQueue, QueueConfig};
use drip_runtime::jobs::{AutomationJob, EnqueueOptions};

use super::read_json;
use crate::TRACING_TARGET_COMMAND;

/// Arguments of `drip enqueue`.
#[derive(Debug, Clone, Args)]
pub struct EnqueueArgs {
    /// Job JSON file (`{"job": "<Name>", "payload": {...}}`, `-` for stdin).
    pub job: PathBuf,

    /// Seconds before the job may run.
    #[arg(long)]
    pub delay_secs: Option<u64>,

    /// Delivery attempts; the queue default applies when omitted.
    #[arg(long)]
    pub attempts: Option<u32>,

    #[command(flatten)]
    pub nats: NatsConfig,

    #[command(flatten)]
    pub queue: QueueConfig,
}

impl EnqueueArgs {
    fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            delay: self.delay_secs.map(Duration::from_secs),
            attempts: self.attempts,
        }
    }
}

pub async fn run(args: EnqueueArgs) -> anyhow::Result<JobEnvelope> {
    let job: AutomationJob = read_json(&args.job)?;
    let options = args.options();

    let client = NatsClient::connect(args.nats)
        .await
        .context("failed to connect to NATS")?;
    let queue = NatsJobQueue::new(&client, args.queue)
        .await
        .context("failed to open the job stream")?;

    let envelope = queue.envelope(job, options);
    queue
        .publish(&envelope)
        .await
        .context("failed to publish job")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        envelope_id = %envelope.id,
        job = envelope.job.name(),
        max_attempts = envelope.max_attempts,
        "Job published"
    );

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        args: EnqueueArgs,
    }

    #[test]
    fn test_options_from_flags() {
        let harness = Harness::try_parse_from([
            "drip",
            "job.json",
            "--delay-secs",
            "30",
            "--nats-url",
            "nats://10.0.0.1:4222",
        ])
        .unwrap();

        assert_eq!(
            harness.args.options(),
            EnqueueOptions::delayed(Duration::from_secs(30))
        );
        assert_eq!(harness.args.nats.nats_url, "nats://10.0.0.1:4222");
        assert_eq!(harness.args.queue, QueueConfig::default());
    }
}
