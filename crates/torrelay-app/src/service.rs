//! Request admission and the registry of running download jobs.
//!
//! # Design
//! - One job task per handle; its cancellation token is a child of the
//!   service shutdown token.
//! - The registry lock is a std mutex held only for map updates.
//! - Finished entries stay until joined or pruned by the janitor.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use torrelay_config::TorrelayConfig;
use torrelay_delivery::{ChatId, DeliveryPipeline, PrimaryChannel, RelayUploader, StagingArea};
use torrelay_events::{Event, EventBus};
use torrelay_monitor::{CompletionMonitor, ProgressThrottle, ThrottlePolicy};
use torrelay_torrent_core::{DownloadEngine, TorrentDescriptor, TorrentHandle};
use torrelay_telemetry::service_span;
use tracing::{Instrument, debug, info};

use crate::error::{AppError, AppResult};
use crate::job::{self, JobReport};

/// Collaborators injected into [`TorrelayService`].
pub struct ServiceDeps {
    /// Download engine.
    pub engine: Arc<dyn DownloadEngine>,
    /// Channel user-facing messages and documents go through.
    pub primary: Arc<dyn PrimaryChannel>,
    /// Relay uploader; `None` disables the relay strategy.
    pub relay: Option<Arc<RelayUploader>>,
    /// Shared event bus.
    pub events: EventBus,
}

struct JobEntry {
    cancel: CancellationToken,
    task: JoinHandle<JobReport>,
}

pub(crate) struct ServiceInner {
    pub(crate) engine: Arc<dyn DownloadEngine>,
    pub(crate) primary: Arc<dyn PrimaryChannel>,
    pub(crate) pipeline: DeliveryPipeline,
    pub(crate) monitor: CompletionMonitor,
    pub(crate) throttle: ProgressThrottle,
    pub(crate) staging: StagingArea,
    pub(crate) events: EventBus,
    pub(crate) observation_capacity: usize,
    pub(crate) config: TorrelayConfig,
    pub(crate) active_scopes: Mutex<HashSet<PathBuf>>,
    shutdown: CancellationToken,
    jobs: Mutex<HashMap<TorrentHandle, JobEntry>>,
}

/// Entry point for download requests; cheap to clone.
#[derive(Clone)]
pub struct TorrelayService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl TorrelayService {
    /// Assemble the service from injected collaborators and configuration.
    #[must_use]
    pub fn new(deps: ServiceDeps, config: TorrelayConfig) -> Self {
        let ServiceDeps {
            engine,
            primary,
            relay,
            events,
        } = deps;
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&primary),
            relay,
            config.delivery,
            events.clone(),
        );
        let monitor = CompletionMonitor::new(Arc::clone(&engine), config.monitor.poll_interval);
        let throttle = ProgressThrottle::new(ThrottlePolicy {
            min_interval: config.throttle.min_interval,
            min_step: config.throttle.min_step,
            ..ThrottlePolicy::default()
        });
        let staging = StagingArea::new(
            config.staging.root.clone(),
            config.staging.max_disk_usage,
        );
        Self {
            inner: Arc::new(ServiceInner {
                engine,
                primary,
                pipeline,
                monitor,
                throttle,
                staging,
                events,
                observation_capacity: config.monitor.observation_capacity.max(1),
                config,
                active_scopes: Mutex::default(),
                shutdown: CancellationToken::new(),
                jobs: Mutex::default(),
            }),
        }
    }

    /// Hand `descriptor` to the engine and start monitoring it for `chat`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Engine`] when the engine cannot be reached.
    /// - [`AppError::NotAdmitted`] when the engine yields no handle.
    /// - [`AppError::AlreadyMonitored`] when a job for the handle still runs.
    pub async fn submit(
        &self,
        chat: ChatId,
        descriptor: TorrentDescriptor,
    ) -> AppResult<TorrentHandle> {
        let handle = self
            .inner
            .engine
            .add(descriptor)
            .await
            .map_err(|err| AppError::engine("engine.add", err))?
            .ok_or(AppError::NotAdmitted)?;

        let mut jobs = lock(&self.inner.jobs);
        if jobs
            .get(&handle)
            .is_some_and(|entry| !entry.task.is_finished())
        {
            return Err(AppError::AlreadyMonitored { handle });
        }
        let cancel = self.inner.shutdown.child_token();
        let task = tokio::spawn(
            job::run(Arc::clone(&self.inner), chat, handle.clone(), cancel.clone())
                .instrument(service_span()),
        );
        jobs.insert(handle.clone(), JobEntry { cancel, task });
        drop(jobs);

        info!(handle = %handle, chat = %chat, "download job started");
        self.inner.events.publish(Event::TorrentAdded {
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Stop the job for `handle` and remove the torrent from the engine.
    ///
    /// Returns whether a running job was signalled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`] when the engine refuses the removal.
    pub async fn cancel(&self, handle: &TorrentHandle, delete_files: bool) -> AppResult<bool> {
        let signalled = match lock(&self.inner.jobs).get(handle) {
            Some(entry) if !entry.task.is_finished() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        };
        self.inner
            .engine
            .remove(handle, delete_files)
            .await
            .map_err(|err| AppError::engine("engine.remove", err))?;
        info!(handle = %handle, signalled, delete_files, "download cancelled");
        Ok(signalled)
    }

    /// Wait for the job of `handle` to finish and take its report.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Join`] when the job task panicked.
    pub async fn join(&self, handle: &TorrentHandle) -> AppResult<Option<JobReport>> {
        let Some(entry) = lock(&self.inner.jobs).remove(handle) else {
            return Ok(None);
        };
        entry
            .task
            .await
            .map(Some)
            .map_err(|source| AppError::Join {
                handle: handle.clone(),
                source,
            })
    }

    /// Handles whose job task is still running.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<TorrentHandle> {
        lock(&self.inner.jobs)
            .iter()
            .filter(|(_, entry)| !entry.task.is_finished())
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    /// Drop registry entries of finished jobs; returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut jobs = lock(&self.inner.jobs);
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.task.is_finished());
        let pruned = before - jobs.len();
        if pruned > 0 {
            debug!(pruned, "finished jobs pruned");
        }
        pruned
    }

    /// Cancel every job and background task spawned by this service.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Token cancelled by [`Self::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Progress throttle shared by all jobs.
    #[must_use]
    pub fn throttle(&self) -> &ProgressThrottle {
        &self.inner.throttle
    }

    /// Event bus the service publishes on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Whether files above the direct limit may go through the relay.
    #[must_use]
    pub fn relay_enabled(&self) -> bool {
        self.inner.pipeline.relay().is_some()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
