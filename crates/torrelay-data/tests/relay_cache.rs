use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tempfile::TempDir;
use torrelay_data::{RelayCache, RelayCacheRecord, RelayMediaKind};

async fn open_cache() -> Result<(TempDir, RelayCache)> {
    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    let cache = RelayCache::open(dir.path().join("nested").join("relay_cache.db"))
        .await
        .context("failed to open relay cache")?;
    Ok((dir, cache))
}

fn record(path: &str, relay_id: &str, uploaded_at: DateTime<Utc>) -> RelayCacheRecord {
    RelayCacheRecord {
        file_path: PathBuf::from(path),
        relay_id: relay_id.to_string(),
        relay_unique_id: format!("{relay_id}-unique"),
        size: 3 * 1024 * 1024 * 1024,
        kind: RelayMediaKind::Video,
        uploaded_at,
        channel_id: -1_001_234,
        message_ref: 42,
        modified_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default(),
    }
}

#[tokio::test]
async fn stored_records_round_trip() -> Result<()> {
    let (_dir, cache) = open_cache().await?;
    let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_default();
    let stored = record("/downloads/movie.mkv", "file-1", now);
    cache.store(&stored).await?;

    let fetched = cache
        .get(Path::new("/downloads/movie.mkv"))
        .await?
        .context("record should exist")?;
    assert_eq!(fetched, stored);
    assert!(cache.get(Path::new("/downloads/other.mkv")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn storing_same_path_keeps_latest() -> Result<()> {
    let (_dir, cache) = open_cache().await?;
    let now = Utc::now();
    cache.store(&record("/downloads/a.iso", "first", now)).await?;
    cache.store(&record("/downloads/a.iso", "second", now)).await?;

    let fetched = cache
        .get(Path::new("/downloads/a.iso"))
        .await?
        .context("record should exist")?;
    assert_eq!(fetched.relay_id, "second");
    assert_eq!(cache.stats().await?.records, 1);
    Ok(())
}

#[tokio::test]
async fn eviction_bounds() -> Result<()> {
    let (_dir, cache) = open_cache().await?;
    let now = Utc::now();
    cache.store(&record("/d/old", "old", now - TimeDelta::days(40))).await?;
    cache.store(&record("/d/new", "new", now - TimeDelta::hours(1))).await?;

    assert_eq!(cache.evict_older_than(Duration::MAX).await?, 0);
    assert_eq!(cache.evict_older_than(Duration::from_secs(30 * 86_400)).await?, 1);
    assert!(cache.get(Path::new("/d/old")).await?.is_none());
    assert!(cache.get(Path::new("/d/new")).await?.is_some());
    assert_eq!(cache.evict_older_than(Duration::ZERO).await?, 1);
    assert_eq!(cache.stats().await?.records, 0);
    Ok(())
}

#[tokio::test]
async fn stats_and_remove() -> Result<()> {
    let (_dir, cache) = open_cache().await?;
    let empty = cache.stats().await?;
    assert_eq!(empty.records, 0);
    assert_eq!(empty.total_bytes, 0);
    assert!(empty.oldest.is_none());

    let older = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default();
    let newer = DateTime::from_timestamp_millis(1_700_000_500_000).unwrap_or_default();
    cache.store(&record("/d/one", "one", older)).await?;
    cache.store(&record("/d/two", "two", newer)).await?;

    let stats = cache.stats().await?;
    assert_eq!(stats.records, 2);
    assert_eq!(stats.total_bytes, 6 * 1024 * 1024 * 1024);
    assert_eq!(stats.oldest, Some(older));
    assert_eq!(stats.newest, Some(newer));

    assert!(cache.remove(Path::new("/d/one")).await?);
    assert!(!cache.remove(Path::new("/d/one")).await?);
    assert_eq!(cache.stats().await?.records, 1);
    Ok(())
}

#[tokio::test]
async fn reopening_preserves_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relay_cache.db");
    {
        let cache = RelayCache::open(&path).await?;
        cache.store(&record("/d/keep", "keep", Utc::now())).await?;
        cache.pool().close().await;
    }
    let cache = RelayCache::open(&path).await?;
    assert!(cache.get(Path::new("/d/keep")).await?.is_some());
    Ok(())
}
