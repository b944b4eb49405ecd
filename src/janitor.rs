use std::{sync::Arc, time::SystemTime};

use tokio::{task::JoinHandle, time::Duration};
use tracing::{debug, info, warn};

use crate::store::{ArtifactStore, SweepReport};

/// Background task that periodically deletes expired artifacts.
#[derive(Debug, Clone)]
pub struct Janitor {
    store: Arc<ArtifactStore>,
    interval: Duration,
    max_age: Duration,
}

impl Janitor {
    pub fn new(store: Arc<ArtifactStore>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            interval,
            max_age,
        }
    }

    /// Starts the sleep/sweep loop. It runs for the life of the process; a
    /// failed sweep is logged and the next one is attempted on schedule.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            interval_seconds = self.interval.as_secs(),
            max_age_seconds = self.max_age.as_secs(),
            "janitor started"
        );

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                self.sweep_once().await;
            }
        })
    }

    pub async fn sweep_once(&self) -> Option<SweepReport> {
        match self
            .store
            .sweep_expired(self.max_age, SystemTime::now())
            .await
        {
            Ok(report) => {
                if report.removed > 0 || report.failed > 0 {
                    info!(
                        removed = report.removed,
                        failed = report.failed,
                        "janitor sweep finished"
                    );
                } else {
                    debug!("janitor sweep found nothing to remove");
                }
                Some(report)
            }
            Err(error) => {
                warn!("janitor sweep failed: {error}");
                None
            }
        }
    }
}
