//! Periodic relay cache eviction and staging cleanup.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use torrelay_delivery::PurgeReport;
use torrelay_events::Event;
use torrelay_telemetry::service_span;
use tracing::{Instrument, info, warn};

use crate::error::{AppError, AppResult};
use crate::service::{TorrelayService, lock};

/// Result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    /// Relay cache records evicted.
    pub evicted: u64,
    /// Stale staging entries purged.
    pub purged: PurgeReport,
    /// Staging entries removed because the budget was exceeded.
    pub reclaimed: PurgeReport,
    /// Finished job entries dropped from the registry.
    pub pruned_jobs: usize,
}

impl TorrelayService {
    /// Run one maintenance sweep.
    ///
    /// Staging directories of deliveries still in flight are never reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Cache`] when eviction fails and
    /// [`AppError::Staging`] when the staging root cannot be scanned.
    pub async fn run_janitor_once(&self) -> AppResult<JanitorReport> {
        let mut report = JanitorReport::default();

        if let (Some(relay), Some(settings)) =
            (self.inner.pipeline.relay(), self.inner.config.relay.as_ref())
        {
            report.evicted = relay
                .cache()
                .evict_older_than(settings.cache_max_age)
                .await
                .map_err(|err| AppError::cache("relay_cache.evict", err))?;
            if report.evicted > 0 {
                self.inner.events.publish(Event::RelayCacheEvicted {
                    removed: report.evicted,
                });
            }
        }

        report.purged = self
            .inner
            .staging
            .purge_stale(self.inner.config.staging.stale_after)
            .await
            .map_err(|source| AppError::Staging {
                operation: "staging.purge_stale",
                source,
            })?;
        let active = lock(&self.inner.active_scopes).clone();
        report.reclaimed = self
            .inner
            .staging
            .reclaim_over_budget(active)
            .await
            .map_err(|source| AppError::Staging {
                operation: "staging.reclaim_over_budget",
                source,
            })?;
        report.pruned_jobs = self.prune_finished();

        info!(
            evicted = report.evicted,
            purged = report.purged.removed,
            freed_bytes = report.purged.freed_bytes,
            reclaimed = report.reclaimed.removed,
            reclaimed_bytes = report.reclaimed.freed_bytes,
            pruned_jobs = report.pruned_jobs,
            "janitor sweep finished"
        );
        Ok(report)
    }

    /// Sweep every `every` until the service shuts down. The first sweep runs
    /// immediately.
    #[must_use]
    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        let shutdown = self.shutdown_token();
        let sweeps = async move {
            let mut ticker = interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = service.run_janitor_once().await {
                    warn!(error = %err, "janitor sweep failed");
                }
            }
        };
        tokio::spawn(sweeps.instrument(service_span()))
    }
}
