//! Application state shared across handlers.

use edgerun_core::Config;
use edgerun_db::{MetadataStore, QueueStore};
use edgerun_worker::SchedulerConfig;

#[derive(Clone)]
pub struct AppState {
    pub metadata: MetadataStore,
    pub queue: QueueStore,
    pub scheduler_config: SchedulerConfig,
}

impl AppState {
    pub fn new(metadata: MetadataStore, queue: QueueStore, config: &Config) -> Self {
        Self {
            metadata,
            queue,
            scheduler_config: SchedulerConfig {
                max_workers: config.scheduler_max_workers,
                poll_interval_ms: config.scheduler_poll_interval_ms,
                default_timeout_ms: config.function_execution_timeout_ms,
                sandbox_runtime_command: config.sandbox_runtime_command.clone(),
                ..SchedulerConfig::default()
            },
        }
    }
}
