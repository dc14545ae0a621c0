//! Application state management

use std::sync::Arc;
use std::time::Duration;

use crate::report::ArtifactReader;
use crate::scheduler::Scheduler;

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub reader: ArtifactReader,
    /// Age after which the published verdict is reported as stale
    pub stale_after: Duration,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let config = scheduler.engine().config();
        let reader = ArtifactReader::new(&config.artifacts);
        let stale_after = config.stale_after();
        Self {
            scheduler,
            reader,
            stale_after,
            started_at: chrono::Utc::now(),
        }
    }
}
