//! Scratch space for split output.
//!
//! Each delivery receives its own directory under the staging root so that
//! concurrent deliveries never collide on part names. The root as a whole is
//! bounded by a byte budget and swept for stale entries. When the budget is
//! exceeded anyway, entries older than an hour go first and then the largest
//! remaining ones until usage drops to 80% of the budget.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{DeliveryError, DeliveryResult};

const AGGRESSIVE_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Bounded staging root.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    max_usage: u64,
}

/// Per-delivery staging directory.
#[derive(Debug)]
pub struct StagingDir {
    id: Uuid,
    path: PathBuf,
}

/// Result of a staging sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Top-level entries removed.
    pub removed: usize,
    /// Bytes those entries occupied.
    pub freed_bytes: u64,
}

impl StagingArea {
    /// Staging area rooted at `root`, bounded to `max_usage` bytes.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_usage: u64) -> Self {
        Self {
            root: root.into(),
            max_usage,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Byte budget of the root.
    #[must_use]
    pub const fn max_usage(&self) -> u64 {
        self.max_usage
    }

    /// Create a fresh per-delivery directory.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Io`] when the directory cannot be created.
    pub async fn scope(&self) -> DeliveryResult<StagingDir> {
        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| DeliveryError::io("create staging dir", &path, source))?;
        debug!(path = %path.display(), "staging directory created");
        Ok(StagingDir { id, path })
    }

    /// Bytes currently held under the root.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Worker`] if the blocking walk fails to run.
    pub async fn usage(&self) -> DeliveryResult<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || directory_size(&root))
            .await
            .map_err(|source| DeliveryError::Worker {
                operation: "measure staging usage",
                source,
            })
    }

    /// Check that splitting a file of `file_size` bytes fits the budget.
    ///
    /// Splitting needs room for the source and its parts, so the check is
    /// `usage + 2 * file_size <= max_usage`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::InsufficientSpace`] when the budget would be
    /// exceeded.
    pub async fn ensure_capacity(&self, file_size: u64) -> DeliveryResult<()> {
        let usage = self.usage().await?;
        let required = file_size.saturating_mul(2);
        let available = self.max_usage.saturating_sub(usage);
        if required > available {
            warn!(required, available, usage, "staging budget exhausted");
            return Err(DeliveryError::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Remove top-level entries not modified within `max_age`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Worker`] if the blocking sweep fails to run.
    pub async fn purge_stale(&self, max_age: Duration) -> DeliveryResult<PurgeReport> {
        let root = self.root.clone();
        let report = tokio::task::spawn_blocking(move || purge_entries(&root, max_age, &HashSet::new()))
            .await
            .map_err(|source| DeliveryError::Worker {
                operation: "purge staging",
                source,
            })?;
        if report.removed > 0 {
            info!(removed = report.removed, freed_bytes = report.freed_bytes, "stale staging entries purged");
        }
        Ok(report)
    }

    /// Bring usage back under budget when it is exceeded; a no-op otherwise.
    ///
    /// Top-level entries listed in `active` are never removed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Worker`] if the blocking sweep fails to run.
    pub async fn reclaim_over_budget(&self, active: HashSet<PathBuf>) -> DeliveryResult<PurgeReport> {
        let root = self.root.clone();
        let max_usage = self.max_usage;
        tokio::task::spawn_blocking(move || reclaim_entries(&root, max_usage, &active))
            .await
            .map_err(|source| DeliveryError::Worker {
                operation: "reclaim staging",
                source,
            })
    }
}

impl StagingDir {
    /// Unique identifier of this directory.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and everything in it.
    pub async fn cleanup(self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "staging directory removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove staging directory");
            }
        }
    }
}

fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn purge_entries(root: &Path, max_age: Duration, active: &HashSet<PathBuf>) -> PurgeReport {
    let mut report = PurgeReport::default();
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return report;
    };
    let Ok(entries) = std::fs::read_dir(root) else {
        return report;
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if active.contains(&path) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified > cutoff {
            continue;
        }
        let size = directory_size(&path);
        if remove_entry(&path, metadata.is_dir()) {
            report.removed += 1;
            report.freed_bytes += size;
        }
    }
    report
}

fn reclaim_entries(root: &Path, max_usage: u64, active: &HashSet<PathBuf>) -> PurgeReport {
    let mut usage = directory_size(root);
    if usage <= max_usage {
        return PurgeReport::default();
    }
    warn!(usage, max_usage, "staging budget exceeded; reclaiming space");

    let mut report = purge_entries(root, AGGRESSIVE_STALE_AFTER, active);
    usage = usage.saturating_sub(report.freed_bytes);
    if usage > max_usage {
        let target = max_usage - max_usage / 5;
        let mut candidates: Vec<(PathBuf, u64, bool)> = std::fs::read_dir(root)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| !active.contains(&entry.path()))
                    .filter_map(|entry| {
                        let is_dir = entry.file_type().ok()?.is_dir();
                        let path = entry.path();
                        let size = directory_size(&path);
                        Some((path, size, is_dir))
                    })
                    .collect()
            })
            .unwrap_or_default();
        candidates.sort_by(|left, right| right.1.cmp(&left.1));

        for (path, size, is_dir) in candidates {
            if usage <= target {
                break;
            }
            if remove_entry(&path, is_dir) {
                debug!(path = %path.display(), size, "largest staging entry removed");
                usage = usage.saturating_sub(size);
                report.removed += 1;
                report.freed_bytes += size;
            }
        }
    }

    info!(
        removed = report.removed,
        freed_bytes = report.freed_bytes,
        usage,
        "staging space reclaimed"
    );
    report
}

fn remove_entry(path: &Path, is_dir: bool) -> bool {
    let removed = if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove staging entry");
            false
        }
    }
}
