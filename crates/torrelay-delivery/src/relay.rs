//! Relay uploads with a persistent identifier cache.
//!
//! # Design
//! - Cache hits are trusted only when the file's size and modification time
//!   still match the stored record.
//! - A rate-limited upload sleeps for the advised delay and retries once.
//! - Uploads of the same path are serialised; different paths run freely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use torrelay_data::{RelayCache, RelayCacheRecord};
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChatId, RelayChannel, RelayReceipt, UploadProgress};
use crate::error::{DeliveryError, DeliveryResult};

type PathLocks = Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>;

/// Uploads files through a [`RelayChannel`] and remembers the identifiers.
pub struct RelayUploader {
    channel: Arc<dyn RelayChannel>,
    cache: RelayCache,
    storage_chat: ChatId,
    locks: PathLocks,
}

impl RelayUploader {
    /// Build an uploader that stores payloads in `storage_chat`.
    #[must_use]
    pub fn new(channel: Arc<dyn RelayChannel>, cache: RelayCache, storage_chat: ChatId) -> Self {
        Self {
            channel,
            cache,
            storage_chat,
            locks: Mutex::default(),
        }
    }

    /// Identifier cache backing this uploader.
    #[must_use]
    pub const fn cache(&self) -> &RelayCache {
        &self.cache
    }

    /// Whether the storage chat is reachable right now.
    pub async fn is_available(&self) -> bool {
        self.channel.resolve(self.storage_chat).await
    }

    /// Upload `file_path` or reuse a still-valid cached identifier.
    ///
    /// `force` skips the cache lookup; the fresh record still replaces any
    /// stored one.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Io`] when the file cannot be inspected.
    /// - [`DeliveryError::Cache`] when the cache cannot be read.
    /// - [`DeliveryError::TransientRelay`] when the retry after a rate limit fails.
    /// - [`DeliveryError::RelayUnavailable`] for any other upload failure.
    pub async fn upload(
        &self,
        file_path: &Path,
        progress: Option<UploadProgress>,
        force: bool,
    ) -> DeliveryResult<RelayCacheRecord> {
        let lease = self.lease(file_path);
        let _guard = lease.lock.lock().await;
        self.upload_locked(file_path, progress, force).await
    }

    async fn upload_locked(
        &self,
        file_path: &Path,
        progress: Option<UploadProgress>,
        force: bool,
    ) -> DeliveryResult<RelayCacheRecord> {
        let metadata = tokio::fs::metadata(file_path)
            .await
            .map_err(|source| DeliveryError::io("stat relay source", file_path, source))?;
        let size = metadata.len();
        let modified_at = metadata
            .modified()
            .map(system_time_to_utc)
            .map_err(|source| DeliveryError::io("read modification time", file_path, source))?;

        if !force {
            let cached = self
                .cache
                .get(file_path)
                .await
                .map_err(|source| DeliveryError::Cache { source })?;
            match cached {
                Some(record) if is_fresh(&record, size, modified_at) => {
                    info!(path = %file_path.display(), relay_id = %record.relay_id, "relay cache hit");
                    return Ok(record);
                }
                Some(_) => {
                    debug!(path = %file_path.display(), "cached relay identifier is stale");
                }
                None => {}
            }
        }

        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let receipt = self.upload_with_retry(file_path, &file_name, progress).await?;
        let record = RelayCacheRecord {
            file_path: file_path.to_path_buf(),
            relay_id: receipt.relay_id,
            relay_unique_id: receipt.relay_unique_id,
            size,
            kind: receipt.kind,
            uploaded_at: Utc::now(),
            channel_id: receipt.channel_id,
            message_ref: receipt.message_ref,
            modified_at,
        };

        if let Err(err) = self.cache.store(&record).await {
            warn!(path = %file_path.display(), error = %err, "failed to cache relay identifier");
        }
        info!(path = %file_path.display(), relay_id = %record.relay_id, size, "relay upload finished");
        Ok(record)
    }

    async fn upload_with_retry(
        &self,
        file_path: &Path,
        file_name: &str,
        progress: Option<UploadProgress>,
    ) -> DeliveryResult<RelayReceipt> {
        let first = self
            .channel
            .upload(self.storage_chat, file_path, file_name, progress.clone())
            .await;
        match first {
            Ok(receipt) => Ok(receipt),
            Err(ChannelError::RateLimited { retry_after }) => {
                warn!(
                    path = %file_path.display(),
                    retry_after_secs = retry_after.as_secs_f64(),
                    "relay rate limited; retrying once"
                );
                tokio::time::sleep(retry_after).await;
                self.channel
                    .upload(self.storage_chat, file_path, file_name, progress)
                    .await
                    .map_err(|source| DeliveryError::TransientRelay {
                        path: file_path.to_path_buf(),
                        source,
                    })
            }
            Err(source) => Err(DeliveryError::RelayUnavailable {
                path: file_path.to_path_buf(),
                source,
            }),
        }
    }

    fn lease(&self, file_path: &Path) -> PathLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(file_path.to_path_buf()).or_default().clone();
        PathLease {
            locks: &self.locks,
            path: file_path.to_path_buf(),
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Claim on a per-path lock; the map entry goes away with its last claim,
/// including when the upload future is dropped mid-flight.
struct PathLease<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for PathLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this lease hold the only references once nobody waits.
        let ours = locks
            .get(&self.path)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.path);
        }
    }
}

fn is_fresh(record: &RelayCacheRecord, size: u64, modified_at: DateTime<Utc>) -> bool {
    record.size == size && record.modified_at.timestamp_millis() == modified_at.timestamp_millis()
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use torrelay_data::RelayMediaKind;

    use crate::channel::ChannelResult;

    // Test-support doubles implement the trait of a separate build of this
    // crate, so unit tests carry their own.
    struct CountingRelay {
        uploads: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl RelayChannel for CountingRelay {
        async fn upload(
            &self,
            storage_chat: ChatId,
            _file_path: &Path,
            file_name: &str,
            _progress: Option<UploadProgress>,
        ) -> ChannelResult<RelayReceipt> {
            let call = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(RelayReceipt {
                relay_id: format!("{file_name}-{call}"),
                relay_unique_id: format!("unique-{call}"),
                kind: RelayMediaKind::Document,
                channel_id: storage_chat.0,
                message_ref: i64::try_from(call).unwrap_or_default(),
            })
        }

        async fn resolve(&self, _storage_chat: ChatId) -> bool {
            true
        }
    }

    async fn uploader(dir: &Path, delay: Duration) -> Result<(Arc<CountingRelay>, RelayUploader)> {
        let relay = Arc::new(CountingRelay {
            uploads: AtomicUsize::new(0),
            delay,
        });
        let cache = RelayCache::open(dir.join("cache.db")).await?;
        let uploader = RelayUploader::new(relay.clone(), cache, ChatId(-100));
        Ok((relay, uploader))
    }

    #[tokio::test]
    async fn concurrent_uploads_of_one_path_hit_the_relay_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, vec![7_u8; 4096])?;
        let (relay, uploader) = uploader(dir.path(), Duration::from_millis(50)).await?;

        let (first, second) = tokio::join!(
            uploader.upload(&file, None, false),
            uploader.upload(&file, None, false)
        );
        assert_eq!(first?.relay_id, second?.relay_id);
        assert_eq!(relay.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.tracked_locks(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn force_bypasses_cache_and_replaces_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("album.flac");
        std::fs::write(&file, b"audio")?;
        let (relay, uploader) = uploader(dir.path(), Duration::ZERO).await?;

        let first = uploader.upload(&file, None, false).await?;
        let forced = uploader.upload(&file, None, true).await?;
        assert_ne!(first.relay_id, forced.relay_id);
        assert_eq!(relay.uploads.load(Ordering::SeqCst), 2);

        let cached = uploader.upload(&file, None, false).await?;
        assert_eq!(cached.relay_id, forced.relay_id);
        assert_eq!(relay.uploads.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_upload_releases_its_path_lock() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("slow.mkv");
        std::fs::write(&file, vec![3_u8; 1024])?;
        let (_relay, uploader) = uploader(dir.path(), Duration::from_secs(5)).await?;

        let abandoned =
            tokio::time::timeout(Duration::from_millis(200), uploader.upload(&file, None, false)).await;
        assert!(abandoned.is_err());
        assert_eq!(uploader.tracked_locks(), 0);
        Ok(())
    }

    #[test]
    fn freshness_compares_size_and_millisecond_mtime() {
        let modified_at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap_or_default();
        let record = RelayCacheRecord {
            file_path: PathBuf::from("/d/a"),
            relay_id: "id".to_string(),
            relay_unique_id: "uid".to_string(),
            size: 10,
            kind: RelayMediaKind::Document,
            uploaded_at: modified_at,
            channel_id: 0,
            message_ref: 0,
            modified_at,
        };
        assert!(is_fresh(&record, 10, modified_at));
        assert!(!is_fresh(&record, 11, modified_at));
        assert!(!is_fresh(
            &record,
            10,
            modified_at + chrono::TimeDelta::milliseconds(1)
        ));
    }
}
