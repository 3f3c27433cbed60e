//! Emission policy for progress observations.
//!
//! # Design
//! - One tracker entry per handle, created on the first emission and removed
//!   only through [`ProgressThrottle::forget`].
//! - The entry map sits behind a std mutex held for single lookups or updates,
//!   never across an await point.
//! - Time is read from `tokio::time::Instant` so paused-clock tests are exact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use torrelay_torrent_core::TorrentHandle;

/// Progress percentages that always produce an emission when crossed.
pub const DEFAULT_MILESTONES: [f64; 7] = [25.0, 50.0, 75.0, 90.0, 95.0, 99.0, 100.0];

/// Thresholds deciding when an observation is worth surfacing.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    /// Emit once this much time has passed since the last emission.
    pub min_interval: Duration,
    /// Emit once progress moved by at least this many points.
    pub min_step: f64,
    /// Milestones that emit when crossed, in ascending order.
    pub milestones: Vec<f64>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            min_step: 5.0,
            milestones: DEFAULT_MILESTONES.to_vec(),
        }
    }
}

impl ThrottlePolicy {
    fn admits(&self, entry: TrackerEntry, progress: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(entry.last_emitted_at);
        if elapsed >= self.min_interval {
            return true;
        }
        if (progress - entry.last_emitted_progress).abs() >= self.min_step {
            return true;
        }
        self.milestones
            .iter()
            .any(|&milestone| entry.last_emitted_progress < milestone && milestone <= progress)
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackerEntry {
    last_emitted_at: Instant,
    last_emitted_progress: f64,
}

/// Shared per-handle throttle; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressThrottle {
    policy: Arc<ThrottlePolicy>,
    entries: Arc<Mutex<HashMap<TorrentHandle, TrackerEntry>>>,
}

impl ProgressThrottle {
    /// Build a throttle with an explicit policy.
    #[must_use]
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            entries: Arc::default(),
        }
    }

    /// Policy in effect.
    #[must_use]
    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Whether `progress` for `handle` should be surfaced now.
    ///
    /// The first observation for a handle always qualifies.
    #[must_use]
    pub fn should_emit(&self, handle: &TorrentHandle, progress: f64) -> bool {
        let entry = self.lock().get(handle).copied();
        entry.is_none_or(|entry| self.policy.admits(entry, progress, Instant::now()))
    }

    /// Record that `progress` was surfaced for `handle`.
    pub fn record_emitted(&self, handle: &TorrentHandle, progress: f64) {
        self.lock().insert(
            handle.clone(),
            TrackerEntry {
                last_emitted_at: Instant::now(),
                last_emitted_progress: progress,
            },
        );
    }

    /// Check and record in one critical section; returns whether to emit.
    pub fn observe(&self, handle: &TorrentHandle, progress: f64) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        let emit = entries
            .get(handle)
            .is_none_or(|&entry| self.policy.admits(entry, progress, now));
        if emit {
            entries.insert(
                handle.clone(),
                TrackerEntry {
                    last_emitted_at: now,
                    last_emitted_progress: progress,
                },
            );
        }
        emit
    }

    /// Release the entry for `handle`; returns whether one existed.
    pub fn forget(&self, handle: &TorrentHandle) -> bool {
        self.lock().remove(handle).is_some()
    }

    /// Number of handles currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TorrentHandle, TrackerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
