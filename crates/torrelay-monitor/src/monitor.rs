//! Poll loop that waits for a torrent to reach a terminal engine state.
//!
//! # Design
//! - One monitor call per handle; nothing is shared between concurrent calls.
//! - The first poll happens immediately, later polls follow a fixed interval.
//! - Cancellation is checked before every poll and raced against the in-flight
//!   engine call.
//! - Transport errors end the loop; reconnect policy belongs to the caller.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use torrelay_torrent_core::{DownloadEngine, EngineState, StatePhase, TorrentHandle, TorrentSnapshot};
use tracing::{debug, info, warn};

use crate::error::{MonitorError, MonitorResult};

/// Default delay between engine polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Terminal result of a monitor loop.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// Payload fully downloaded; carries the final snapshot.
    Completed(TorrentSnapshot),
    /// The engine gave up on the torrent.
    Failed(FailureReason),
    /// The caller abandoned the request.
    Cancelled,
}

/// Why a monitored download failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine reported a failure state.
    EngineState(EngineState),
    /// The engine no longer knows the handle.
    Removed,
}

impl Display for FailureReason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineState(state) => write!(formatter, "engine reported state '{state}'"),
            Self::Removed => formatter.write_str("torrent was removed from the engine"),
        }
    }
}

/// Polls a [`DownloadEngine`] until a torrent completes, fails or is cancelled.
#[derive(Clone)]
pub struct CompletionMonitor {
    engine: Arc<dyn DownloadEngine>,
    poll_interval: Duration,
}

impl CompletionMonitor {
    /// Build a monitor over `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn DownloadEngine>, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Interval between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `handle` reaches a terminal state.
    ///
    /// `on_observation` receives every polled snapshot before it is
    /// classified, including the terminal one.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] when the engine cannot be
    /// queried.
    pub async fn await_completion<F>(
        &self,
        handle: &TorrentHandle,
        cancel: &CancellationToken,
        mut on_observation: F,
    ) -> MonitorResult<MonitorOutcome>
    where
        F: FnMut(&TorrentSnapshot) + Send,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unknown_labels = HashSet::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(cancelled(handle)),
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(cancelled(handle)),
                result = self.engine.snapshot(handle) => result,
            };

            let snapshot = match polled {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    warn!(handle = %handle, "torrent vanished from the engine");
                    return Ok(MonitorOutcome::Failed(FailureReason::Removed));
                }
                Err(source) => {
                    return Err(MonitorError::EngineUnavailable {
                        handle: handle.clone(),
                        source,
                    });
                }
            };

            on_observation(&snapshot);

            if let EngineState::Unknown(label) = &snapshot.state
                && unknown_labels.insert(label.clone())
            {
                warn!(handle = %handle, state = %label, "unrecognised engine state treated as active");
            }

            match snapshot.phase() {
                StatePhase::Active => {
                    debug!(handle = %handle, progress = snapshot.progress, state = %snapshot.state, "torrent still active");
                }
                StatePhase::Succeeded => {
                    info!(handle = %handle, name = %snapshot.name, "download completed");
                    return Ok(MonitorOutcome::Completed(snapshot));
                }
                StatePhase::Failed => {
                    warn!(handle = %handle, state = %snapshot.state, "download failed");
                    return Ok(MonitorOutcome::Failed(FailureReason::EngineState(
                        snapshot.state,
                    )));
                }
            }
        }
    }
}

fn cancelled(handle: &TorrentHandle) -> MonitorOutcome {
    info!(handle = %handle, "monitoring cancelled");
    MonitorOutcome::Cancelled
}
