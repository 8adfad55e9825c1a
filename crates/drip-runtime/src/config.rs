//! Engine configuration.

use std::time::Duration;

use derive_builder::Builder;
use drip_filter::UnknownPropertyPolicy;

/// Configuration for the automation engine.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Ledger rows fetched per page during a batch sweep.
    #[builder(default = "75")]
    pub sweep_page_size: usize,

    /// Delay before a wait-step sweep re-checks contacts that were not due yet.
    #[builder(default = "Duration::from_secs(60)")]
    pub wait_recheck_interval: Duration,

    /// Upper bound on consecutive re-sweeps of one wait step.
    #[builder(default = "20")]
    pub max_sweep_attempts: u32,

    /// Jobs one engine handles at the same time.
    #[builder(default = "32")]
    pub max_concurrent_jobs: usize,

    /// Delivery attempts requested for every enqueued job.
    #[builder(default = "3")]
    pub job_attempts: u32,

    /// How filter conditions on unregistered properties compile.
    #[builder(default)]
    pub unknown_property_policy: UnknownPropertyPolicy,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.sweep_page_size
            && size == 0
        {
            return Err("sweep_page_size must be at least 1".into());
        }
        if let Some(jobs) = self.max_concurrent_jobs
            && jobs == 0
        {
            return Err("max_concurrent_jobs must be at least 1".into());
        }
        if let Some(attempts) = self.job_attempts
            && attempts == 0
        {
            return Err("job_attempts must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_page_size: 75,
            wait_recheck_interval: Duration::from_secs(60),
            max_sweep_attempts: 20,
            max_concurrent_jobs: 32,
            job_attempts: 3,
            unknown_property_policy: UnknownPropertyPolicy::default(),
        }
    }
}
