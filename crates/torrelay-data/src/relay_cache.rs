//! Durable map from local file paths to relay-issued identifiers.
//!
//! # Design
//! - One row per `file_path`; storing again replaces the row in place.
//! - Timestamps are persisted as Unix milliseconds.
//! - Eviction is purely age based and never consults the filesystem.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{DataError, Result};

const MAX_CONNECTIONS: u32 = 4;

const UPSERT_UPLOAD: &str = r"
    INSERT INTO relay_uploads (
        file_path, relay_id, relay_unique_id, size_bytes, media_kind,
        uploaded_at_ms, channel_id, message_ref, modified_at_ms
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT (file_path) DO UPDATE SET
        relay_id = excluded.relay_id,
        relay_unique_id = excluded.relay_unique_id,
        size_bytes = excluded.size_bytes,
        media_kind = excluded.media_kind,
        uploaded_at_ms = excluded.uploaded_at_ms,
        channel_id = excluded.channel_id,
        message_ref = excluded.message_ref,
        modified_at_ms = excluded.modified_at_ms
";

const SELECT_UPLOAD: &str = r"
    SELECT file_path, relay_id, relay_unique_id, size_bytes, media_kind,
           uploaded_at_ms, channel_id, message_ref, modified_at_ms
    FROM relay_uploads
    WHERE file_path = ?1
";

const DELETE_UPLOAD: &str = r"DELETE FROM relay_uploads WHERE file_path = ?1";

const EVICT_UPLOADS: &str = r"DELETE FROM relay_uploads WHERE uploaded_at_ms <= ?1";

const UPLOAD_STATS: &str = r"
    SELECT COUNT(*) AS records,
           COALESCE(SUM(size_bytes), 0) AS total_bytes,
           MIN(uploaded_at_ms) AS oldest_ms,
           MAX(uploaded_at_ms) AS newest_ms
    FROM relay_uploads
";

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}

/// Media category the relay filed an upload under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMediaKind {
    /// Generic document attachment.
    Document,
    /// Video attachment.
    Video,
    /// Audio attachment.
    Audio,
}

impl RelayMediaKind {
    /// Stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl Display for RelayMediaKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for RelayMediaKind {
    type Err = DataError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "document" => Ok(Self::Document),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            other => Err(DataError::InvalidRecord {
                field: "media_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Stored outcome of one successful relay upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCacheRecord {
    /// Local file the identifier was issued for.
    pub file_path: PathBuf,
    /// Identifier the primary channel accepts to re-send the payload.
    pub relay_id: String,
    /// Stable identifier of the payload on the relay side.
    pub relay_unique_id: String,
    /// File size at upload time.
    pub size: u64,
    /// Media category.
    pub kind: RelayMediaKind,
    /// Upload completion time.
    pub uploaded_at: DateTime<Utc>,
    /// Chat the payload was uploaded into.
    pub channel_id: i64,
    /// Message carrying the payload inside `channel_id`.
    pub message_ref: i64,
    /// Source file modification time at upload.
    pub modified_at: DateTime<Utc>,
}

/// Aggregate view over the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayCacheStats {
    /// Number of stored records.
    pub records: u64,
    /// Sum of recorded file sizes.
    pub total_bytes: u64,
    /// Oldest upload time, if any.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest upload time, if any.
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct RelayUploadRow {
    file_path: String,
    relay_id: String,
    relay_unique_id: String,
    size_bytes: i64,
    media_kind: String,
    uploaded_at_ms: i64,
    channel_id: i64,
    message_ref: i64,
    modified_at_ms: i64,
}

impl TryFrom<RelayUploadRow> for RelayCacheRecord {
    type Error = DataError;

    fn try_from(row: RelayUploadRow) -> Result<Self> {
        Ok(Self {
            file_path: PathBuf::from(row.file_path),
            relay_id: row.relay_id,
            relay_unique_id: row.relay_unique_id,
            size: u64::try_from(row.size_bytes).map_err(|_| DataError::InvalidRecord {
                field: "size_bytes",
                value: row.size_bytes.to_string(),
            })?,
            kind: row.media_kind.parse()?,
            uploaded_at: from_millis("uploaded_at_ms", row.uploaded_at_ms)?,
            channel_id: row.channel_id,
            message_ref: row.message_ref,
            modified_at: from_millis("modified_at_ms", row.modified_at_ms)?,
        })
    }
}

/// SQLite-backed relay identifier cache.
#[derive(Clone)]
pub struct RelayCache {
    pool: SqlitePool,
}

impl RelayCache {
    /// Open (creating if needed) the cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created, the connection fails,
    /// or migrations cannot be applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DataError::StorageUnavailable {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| DataError::ConnectFailed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "relay cache opened");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch the record stored for `file_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored row is malformed.
    pub async fn get(&self, file_path: &Path) -> Result<Option<RelayCacheRecord>> {
        let key = path_key(file_path)?;
        let row = sqlx::query_as::<_, RelayUploadRow>(SELECT_UPLOAD)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_query_err("get relay upload"))?;
        row.map(RelayCacheRecord::try_from).transpose()
    }

    /// Store `record`, replacing any previous record for the same path.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn store(&self, record: &RelayCacheRecord) -> Result<()> {
        let key = path_key(&record.file_path)?;
        sqlx::query(UPSERT_UPLOAD)
            .bind(key)
            .bind(&record.relay_id)
            .bind(&record.relay_unique_id)
            .bind(clamp_i64(record.size))
            .bind(record.kind.as_str())
            .bind(record.uploaded_at.timestamp_millis())
            .bind(record.channel_id)
            .bind(record.message_ref)
            .bind(record.modified_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(map_query_err("store relay upload"))?;
        debug!(path = %record.file_path.display(), relay_id = %record.relay_id, "relay upload cached");
        Ok(())
    }

    /// Drop the record for `file_path`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn remove(&self, file_path: &Path) -> Result<bool> {
        let key = path_key(file_path)?;
        let result = sqlx::query(DELETE_UPLOAD)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_query_err("remove relay upload"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete records uploaded `max_age` or longer ago; returns the count.
    ///
    /// A zero age removes everything, [`Duration::MAX`] removes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<u64> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = Utc::now().timestamp_millis().saturating_sub(max_age_ms);
        self.evict_uploaded_before_ms(cutoff_ms).await
    }

    /// Delete records uploaded at or before `cutoff`; returns the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn evict_uploaded_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.evict_uploaded_before_ms(cutoff.timestamp_millis()).await
    }

    async fn evict_uploaded_before_ms(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query(EVICT_UPLOADS)
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await
            .map_err(map_query_err("evict relay uploads"))?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "relay cache records evicted");
        }
        Ok(removed)
    }

    /// Summarise the cache contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<RelayCacheStats> {
        let row = sqlx::query(UPLOAD_STATS)
            .fetch_one(&self.pool)
            .await
            .map_err(map_query_err("relay cache stats"))?;
        let records: i64 = row
            .try_get("records")
            .map_err(map_query_err("decode relay cache stats"))?;
        let total_bytes: i64 = row
            .try_get("total_bytes")
            .map_err(map_query_err("decode relay cache stats"))?;
        let oldest_ms: Option<i64> = row
            .try_get("oldest_ms")
            .map_err(map_query_err("decode relay cache stats"))?;
        let newest_ms: Option<i64> = row
            .try_get("newest_ms")
            .map_err(map_query_err("decode relay cache stats"))?;

        Ok(RelayCacheStats {
            records: u64::try_from(records).unwrap_or(0),
            total_bytes: u64::try_from(total_bytes).unwrap_or(0),
            oldest: oldest_ms.map(|ms| from_millis("uploaded_at_ms", ms)).transpose()?,
            newest: newest_ms.map(|ms| from_millis("uploaded_at_ms", ms)).transpose()?,
        })
    }
}

fn path_key(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| DataError::PathNotUtf8 {
        field: "file_path",
        path: path.to_path_buf(),
    })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_millis(field: &'static str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| DataError::InvalidRecord {
        field,
        value: millis.to_string(),
    })
}
