//! Typed settings consumed by the torrelay crates.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Fully resolved configuration snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TorrelayConfig {
    /// Size thresholds used by the delivery pipeline.
    pub delivery: DeliveryLimits,
    /// Completion monitor settings.
    pub monitor: MonitorSettings,
    /// Progress throttle thresholds.
    pub throttle: ThrottleSettings,
    /// Relay transport settings; `None` disables the relay path.
    pub relay: Option<RelaySettings>,
    /// Scratch space for split output.
    pub staging: StagingSettings,
    /// Download engine connection settings.
    pub engine: EngineSettings,
    /// Logging preferences.
    pub logging: LoggingSettings,
}

/// Byte thresholds that drive strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryLimits {
    /// Largest file the primary channel accepts as a document.
    pub direct_limit: u64,
    /// Largest file pushed through the relay transport.
    pub relay_limit: u64,
    /// Byte range covered by each split part.
    pub chunk_size: u64,
}

/// Gzip member header, trailer and final block framing per part.
const PART_FRAMING_BYTES: u64 = 64;

impl DeliveryLimits {
    /// Upper bound on the size of a gzip part covering `chunk_size` source
    /// bytes. Incompressible input grows by deflate block overhead on top of
    /// the member framing.
    #[must_use]
    pub const fn part_size_bound(chunk_size: u64) -> u64 {
        chunk_size
            .saturating_add(chunk_size / 256)
            .saturating_add(PART_FRAMING_BYTES)
    }

    /// Largest chunk size whose part bound fits in `max_part_size`; never zero.
    #[must_use]
    pub const fn chunk_size_within(max_part_size: u64) -> u64 {
        let Some(room) = max_part_size.checked_sub(PART_FRAMING_BYTES) else {
            return 1;
        };
        let chunk = room - room.div_ceil(257);
        if chunk == 0 { 1 } else { chunk }
    }

    /// Chunk size to split with when parts must also fit a channel accepting
    /// at most `max_document_size` bytes.
    #[must_use]
    pub const fn effective_chunk_size(&self, max_document_size: u64) -> u64 {
        let ceiling = if self.direct_limit < max_document_size {
            self.direct_limit
        } else {
            max_document_size
        };
        let cap = Self::chunk_size_within(ceiling);
        if self.chunk_size < cap {
            self.chunk_size
        } else {
            cap
        }
    }
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            direct_limit: 50 * MIB,
            relay_limit: 2000 * MIB,
            chunk_size: 45 * MIB,
        }
    }
}

/// Completion monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorSettings {
    /// Delay between engine polls.
    pub poll_interval: Duration,
    /// Bound of the observation channel between monitor and consumer.
    pub observation_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            observation_capacity: 16,
        }
    }
}

/// Thresholds that decide when a progress observation is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThrottleSettings {
    /// Emit at least this often while observations keep arriving.
    pub min_interval: Duration,
    /// Emit when progress moved by at least this many percentage points.
    pub min_step: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            min_step: 5.0,
        }
    }
}

/// Relay transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaySettings {
    /// Chat the relay uploads into before identifiers are reused.
    pub storage_chat_id: i64,
    /// SQLite file backing the relay cache.
    pub cache_path: PathBuf,
    /// Records older than this are evicted by the janitor.
    pub cache_max_age: Duration,
}

/// Scratch space settings for split output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingSettings {
    /// Root under which per-request staging directories are created.
    pub root: PathBuf,
    /// Upper bound on bytes held under `root`.
    pub max_disk_usage: u64,
    /// Staging entries older than this are purged by the janitor.
    pub stale_after: Duration,
    /// Delay between janitor sweeps.
    pub janitor_interval: Duration,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("temp"),
            max_disk_usage: 50 * GIB,
            stale_after: Duration::from_secs(24 * 3600),
            janitor_interval: Duration::from_secs(2 * 3600),
        }
    }
}

/// Download engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSettings {
    /// Base URL of the engine web API.
    pub base_url: String,
    /// Login name.
    pub username: String,
    /// Login secret.
    #[serde(skip_serializing)]
    pub password: String,
    /// Directory the engine saves payloads into.
    pub save_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            save_path: PathBuf::from("downloads"),
        }
    }
}

/// Logging preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is absent.
    pub level: String,
    /// Output format (`json` or `pretty`); inferred from the build when unset.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}
