use std::sync::Arc;

use courier_core::{Config, DeliveryScheduler, SanitizedConfig, SchedulerStatus};

/// Shared application state
pub struct AppState {
    config: Config,
    scheduler: Arc<DeliveryScheduler>,
}

impl AppState {
    pub fn new(config: Config, scheduler: Arc<DeliveryScheduler>) -> Self {
        Self { config, scheduler }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }
}
