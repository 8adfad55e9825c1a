//! `drip simulate`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use drip_filter::{PropertyValue, UnknownPropertyPolicy};
use drip_runtime::jobs::TriggerEvent;
use drip_runtime::memory::{DrainReport, MemoryServices, drain};
use drip_runtime::model::{Contact, LedgerEntry};
use drip_runtime::store::Clock;
use drip_runtime::{ContactId, EmailId, Engine, EngineConfig, EngineConfigBuilder, TagId};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::definition::AutomationDefinition;
use super::read_json;
use crate::TRACING_TARGET_COMMAND;

/// Arguments of `drip simulate`.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Scenario JSON file (`-` for stdin).
    pub scenario: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Upper bound on jobs processed before the run stops.
    #[arg(long, default_value_t = 10_000)]
    pub max_jobs: usize,
}

/// Engine settings exposed on the command line.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Ledger rows per sweep page.
    #[arg(long, env = "DRIP_SWEEP_PAGE_SIZE", default_value_t = 75)]
    pub sweep_page_size: usize,

    /// Seconds before a wait sweep re-checks contacts that were not due.
    #[arg(long, env = "DRIP_WAIT_RECHECK_SECS", default_value_t = 60)]
    pub wait_recheck_secs: u64,

    /// Consecutive re-sweeps of one wait step.
    #[arg(long, env = "DRIP_MAX_SWEEP_ATTEMPTS", default_value_t = 20)]
    pub max_sweep_attempts: u32,

    /// Delivery attempts per job.
    #[arg(long, env = "DRIP_JOB_ATTEMPTS", default_value_t = 3)]
    pub job_attempts: u32,

    /// How conditions on unregistered properties compile.
    #[arg(long, env = "DRIP_UNKNOWN_PROPERTIES", default_value = "never")]
    pub unknown_properties: UnknownPropertyPolicy,
}

impl EngineArgs {
    /// Builds a validated engine configuration.
    pub fn to_config(&self) -> anyhow::Result<EngineConfig> {
        EngineConfigBuilder::default()
            .sweep_page_size(self.sweep_page_size)
            .wait_recheck_interval(Duration::from_secs(self.wait_recheck_secs))
            .max_sweep_attempts(self.max_sweep_attempts)
            .job_attempts(self.job_attempts)
            .unknown_property_policy(self.unknown_properties)
            .build()
            .context("invalid engine configuration")
    }
}

/// An automation plus the contacts and events to run through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Simulated clock start; defaults to now.
    #[serde(default)]
    pub start_at: Option<Timestamp>,
    #[serde(flatten)]
    pub definition: AutomationDefinition,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
    /// Email sends that fail before sends start succeeding.
    #[serde(default)]
    pub failing_emails: usize,
}

/// A trigger event for one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioEvent {
    pub contact_id: ContactId,
    #[serde(flatten)]
    pub trigger: TriggerEvent,
}

/// State of the in-memory collaborators after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub jobs: JobSummary,
    pub ledger: Vec<LedgerEntry>,
    pub contacts: Vec<ContactState>,
    pub emails: Vec<SentEmail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub processed: usize,
    pub done: usize,
    pub skipped: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Jobs were still queued when the job limit was reached.
    pub truncated: bool,
}

impl From<DrainReport> for JobSummary {
    fn from(report: DrainReport) -> Self {
        Self {
            processed: report.processed,
            done: report.done,
            skipped: report.skipped,
            retried: report.retried,
            dropped: report.dropped,
            truncated: report.exhausted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactState {
    pub id: ContactId,
    pub email: String,
    pub tag_ids: Vec<TagId>,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentEmail {
    pub email_id: EmailId,
    pub contact_id: ContactId,
}

pub async fn run(args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    let scenario: Scenario = read_json(&args.scenario)?;
    let config = args.engine.to_config()?;
    simulate(scenario, config, args.max_jobs).await
}

/// Loads the scenario into fresh in-memory collaborators and drains the queue.
pub async fn simulate(
    scenario: Scenario,
    config: EngineConfig,
    max_jobs: usize,
) -> anyhow::Result<SimulationReport> {
    scenario
        .definition
        .validate()
        .context("scenario automation is invalid")?;

    let started_at = scenario.start_at.unwrap_or_else(Timestamp::now);
    let services = MemoryServices::at(started_at);
    let AutomationDefinition {
        automation,
        steps,
        properties,
    } = scenario.definition;

    for (key, kind) in properties {
        services
            .contacts
            .register_property(automation.audience_id, key, kind);
    }
    services.automations.insert_automation(automation);
    for step in steps {
        services.automations.insert_step(step);
    }

    let contact_ids: Vec<ContactId> = scenario.contacts.iter().map(|c| c.id).collect();
    for contact in scenario.contacts {
        services.contacts.insert(contact);
    }
    services.email.fail_next(scenario.failing_emails);

    let engine = Engine::new(config, services.collaborators());
    for event in &scenario.events {
        engine
            .publish_event(event.contact_id, event.trigger)
            .await
            .with_context(|| format!("failed to publish event for contact {}", event.contact_id))?;
    }

    let report = drain(&engine, &services.queue, &services.clock, max_jobs).await?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        processed = report.processed,
        done = report.done,
        skipped = report.skipped,
        dropped = report.dropped,
        "Simulation finished"
    );

    let contacts = contact_ids
        .into_iter()
        .filter_map(|id| services.contacts.get(id))
        .map(|contact| ContactState {
            id: contact.id,
            email: contact.email,
            tag_ids: contact.tag_ids.into_iter().collect(),
            properties: contact.properties,
        })
        .collect();

    let emails = services
        .email
        .sent()
        .into_iter()
        .map(|(email_id, contact_id)| SentEmail {
            email_id,
            contact_id,
        })
        .collect();

    Ok(SimulationReport {
        started_at,
        finished_at: services.clock.now(),
        jobs: report.into(),
        ledger: services.ledger.entries(),
        contacts,
        emails,
    })
}
