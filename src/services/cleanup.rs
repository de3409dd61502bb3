use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::services::registry::AssetRegistry;
use crate::services::upload::UploadCoordinator;

/// Periodic housekeeping: drops abandoned upload sessions and publishes
/// assets whose scheduled time has come.
pub struct CleanupService {
    uploads: Arc<UploadCoordinator>,
    registry: AssetRegistry,
    interval: Duration,
}

impl CleanupService {
    pub fn new(uploads: Arc<UploadCoordinator>, registry: AssetRegistry, interval: Duration) -> Self {
        Self {
            uploads,
            registry,
            interval,
        }
    }

    pub async fn run_scheduler(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Cleanup Scheduler | Started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.run_once().await;
        }
    }

    /// One pass. Failures are logged and left for the next tick.
    pub async fn run_once(&self) {
        let now = Utc::now();

        match self.uploads.purge_expired(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Cleanup Scheduler | Purged {} expired upload session(s)", n),
            Err(e) => tracing::error!("Cleanup Scheduler | Error purging uploads: {}", e),
        }

        match self.registry.publish_due(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Cleanup Scheduler | Published {} scheduled video(s)", n),
            Err(e) => tracing::error!("Cleanup Scheduler | Error publishing scheduled videos: {}", e),
        }
    }
}
