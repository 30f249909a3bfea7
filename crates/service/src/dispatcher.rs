//! Event and walk dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::EventSource;
use crate::filter::IngestFilter;
use crate::walker::Reconciler;

/// Default time between reconciliation walks.
pub const DEFAULT_WALK_INTERVAL: Duration = Duration::from_secs(3600);

/// Longest accepted time between reconciliation walks (30 days).
pub const MAX_WALK_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Feeds watcher events and periodic walks into the ingestion filter.
///
/// Never uploads anything itself, so a slow upload cannot stall discovery.
pub struct Dispatcher {
    events: Option<EventSource>,
    filter: Arc<IngestFilter>,
    reconciler: Reconciler,
    walk_interval: Duration,
    walk_at_start: bool,
}

impl Dispatcher {
    pub fn new(
        events: Option<EventSource>,
        filter: Arc<IngestFilter>,
        reconciler: Reconciler,
        walk_interval: Duration,
        walk_at_start: bool,
    ) -> Self {
        Self {
            events,
            filter,
            reconciler,
            walk_interval,
            walk_at_start,
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        if self.walk_at_start {
            self.walk().await;
        }

        let period = self
            .walk_interval
            .clamp(Duration::from_secs(1), MAX_WALK_INTERVAL);
        if period != self.walk_interval {
            warn!(
                requested_secs = self.walk_interval.as_secs(),
                used_secs = period.as_secs(),
                "walk interval out of range, clamped"
            );
        }
        let mut walk_timer = interval_at(Instant::now() + period, period);
        walk_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = walk_timer.tick() => self.walk().await,
                next = next_event(&mut self.events) => match next {
                    Some(path) => {
                        self.filter.submit(&path);
                    }
                    None => {
                        info!("event source closed, relying on periodic walks");
                        self.events = None;
                    }
                },
            }
        }

        debug!("dispatcher stopped");
    }

    async fn walk(&self) {
        if let Err(e) = self.reconciler.run_once().await {
            error!(error = %e, "reconciliation walk failed");
        }
    }
}

/// Next finalized path, or never when there is no event source.
async fn next_event(events: &mut Option<EventSource>) -> Option<std::path::PathBuf> {
    match events {
        Some(source) => source.next_path().await,
        None => std::future::pending().await,
    }
}
