//! Core torrent domain types and DTOs shared across the workspace.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Opaque identifier issued by the download engine for one admitted torrent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentHandle(String);

impl TorrentHandle {
    /// Wrap an engine-issued identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TorrentHandle {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for TorrentHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Source describing how a torrent should be handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentDescriptor {
    /// Magnet URI to resolve and add.
    Magnet {
        /// Magnet URI.
        uri: String,
    },
    /// Raw `.torrent` metainfo supplied by the user.
    TorrentFile {
        /// File name as uploaded.
        file_name: String,
        /// Bencoded metainfo payload.
        bytes: Vec<u8>,
    },
}

impl TorrentDescriptor {
    /// Convenience constructor for magnet-based descriptors.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for metainfo-based descriptors.
    #[must_use]
    pub fn torrent_file(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::TorrentFile {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Coarse lifecycle phase derived from an engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePhase {
    /// Download still in progress; keep polling.
    Active,
    /// Payload fully downloaded.
    Succeeded,
    /// Engine gave up on the torrent.
    Failed,
}

/// Engine-reported torrent state.
///
/// The labels follow the qBittorrent vocabulary. Labels the mapping does not
/// know are kept verbatim in [`EngineState::Unknown`] and treated as active so
/// that newer engine releases do not abort in-flight downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Actively downloading.
    Downloading,
    /// Fetching metadata for a magnet link.
    FetchingMetadata,
    /// Forced download ignoring queue limits.
    ForcedDownload,
    /// Waiting in the download queue.
    QueuedDownload,
    /// Downloading but no peers are serving data.
    StalledDownload,
    /// Paused (or stopped) before completion.
    PausedDownload,
    /// Verifying on-disk data.
    Checking,
    /// Reserving disk space.
    Allocating,
    /// Moving payload between directories.
    Moving,
    /// Complete and seeding.
    Uploading,
    /// Complete, seeding without connected peers.
    StalledUpload,
    /// Complete, queued for seeding.
    QueuedUpload,
    /// Complete, seeding paused (or stopped).
    PausedUpload,
    /// Complete, forced seeding.
    ForcedUpload,
    /// Engine reported an error.
    Error,
    /// Payload files vanished from disk.
    MissingFiles,
    /// Label not covered by the mapping.
    Unknown(String),
}

impl EngineState {
    /// Map an engine label to the typed state.
    #[must_use]
    pub fn from_engine(label: &str) -> Self {
        match label {
            "downloading" => Self::Downloading,
            "metaDL" | "forcedMetaDL" => Self::FetchingMetadata,
            "forcedDL" => Self::ForcedDownload,
            "queuedDL" => Self::QueuedDownload,
            "stalledDL" => Self::StalledDownload,
            "pausedDL" | "stoppedDL" => Self::PausedDownload,
            "checkingDL" | "checkingUP" | "checkingResumeData" => Self::Checking,
            "allocating" => Self::Allocating,
            "moving" => Self::Moving,
            "uploading" => Self::Uploading,
            "stalledUP" => Self::StalledUpload,
            "queuedUP" => Self::QueuedUpload,
            "pausedUP" | "stoppedUP" => Self::PausedUpload,
            "forcedUP" => Self::ForcedUpload,
            "error" => Self::Error,
            "missingFiles" => Self::MissingFiles,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Lifecycle phase of this state.
    #[must_use]
    pub const fn phase(&self) -> StatePhase {
        match self {
            Self::Downloading
            | Self::FetchingMetadata
            | Self::ForcedDownload
            | Self::QueuedDownload
            | Self::StalledDownload
            | Self::PausedDownload
            | Self::Checking
            | Self::Allocating
            | Self::Moving
            | Self::Unknown(_) => StatePhase::Active,
            Self::Uploading
            | Self::StalledUpload
            | Self::QueuedUpload
            | Self::PausedUpload
            | Self::ForcedUpload => StatePhase::Succeeded,
            Self::Error | Self::MissingFiles => StatePhase::Failed,
        }
    }

    /// Canonical engine label for the state.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Downloading => "downloading",
            Self::FetchingMetadata => "metaDL",
            Self::ForcedDownload => "forcedDL",
            Self::QueuedDownload => "queuedDL",
            Self::StalledDownload => "stalledDL",
            Self::PausedDownload => "pausedDL",
            Self::Checking => "checking",
            Self::Allocating => "allocating",
            Self::Moving => "moving",
            Self::Uploading => "uploading",
            Self::StalledUpload => "stalledUP",
            Self::QueuedUpload => "queuedUP",
            Self::PausedUpload => "pausedUP",
            Self::ForcedUpload => "forcedUP",
            Self::Error => "error",
            Self::MissingFiles => "missingFiles",
            Self::Unknown(label) => label,
        }
    }
}

impl Display for EngineState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Immutable point-in-time view of a torrent produced by one engine poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Display name reported by the engine.
    pub name: String,
    /// Engine state at the time of the poll.
    pub state: EngineState,
    /// Completion percentage in `[0, 100]`.
    pub progress: f64,
    /// Total payload size in bytes.
    pub size: u64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Download rate in bytes per second.
    pub download_speed: u64,
    /// Upload rate in bytes per second.
    pub upload_speed: u64,
    /// Estimated seconds to completion; `None` when the engine has no estimate.
    pub eta: Option<u64>,
    /// Info hash reported by the engine.
    pub hash: String,
}

impl TorrentSnapshot {
    /// Build a snapshot, clamping `progress` into `[0, 100]`.
    #[must_use]
    pub fn new(name: impl Into<String>, state: EngineState, progress: f64) -> Self {
        Self {
            name: name.into(),
            state,
            progress: clamp_progress(progress),
            size: 0,
            downloaded: 0,
            download_speed: 0,
            upload_speed: 0,
            eta: None,
            hash: String::new(),
        }
    }

    /// Phase derived from the reported state.
    #[must_use]
    pub const fn phase(&self) -> StatePhase {
        self.state.phase()
    }
}

/// Clamp a raw progress figure into the `[0, 100]` range; NaN maps to zero.
#[must_use]
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_labels_map_to_phases() {
        for label in ["downloading", "queuedDL", "stalledDL", "checkingDL", "allocating", "moving"] {
            assert_eq!(EngineState::from_engine(label).phase(), StatePhase::Active, "{label}");
        }
        for label in ["uploading", "stalledUP", "queuedUP", "pausedUP", "forcedUP", "stoppedUP"] {
            assert_eq!(
                EngineState::from_engine(label).phase(),
                StatePhase::Succeeded,
                "{label}"
            );
        }
        for label in ["error", "missingFiles"] {
            assert_eq!(EngineState::from_engine(label).phase(), StatePhase::Failed, "{label}");
        }
    }

    #[test]
    fn unknown_labels_fail_open() {
        let state = EngineState::from_engine("quantumDL");
        assert_eq!(state, EngineState::Unknown("quantumDL".to_string()));
        assert_eq!(state.phase(), StatePhase::Active);
        assert_eq!(state.to_string(), "quantumDL");
    }

    #[test]
    fn snapshot_progress_is_clamped() {
        assert!((TorrentSnapshot::new("a", EngineState::Downloading, 140.0).progress - 100.0).abs() < f64::EPSILON);
        assert!(TorrentSnapshot::new("a", EngineState::Downloading, -3.0).progress.abs() < f64::EPSILON);
        assert!(TorrentSnapshot::new("a", EngineState::Downloading, f64::NAN).progress.abs() < f64::EPSILON);
    }

    #[test]
    fn descriptor_serialises_with_tag() {
        let value = serde_json::to_value(TorrentDescriptor::magnet("magnet:?xt=urn:btih:abc"))
            .expect("descriptor serialises");
        assert_eq!(value["type"], "magnet");
        assert_eq!(value["uri"], "magnet:?xt=urn:btih:abc");
    }
}
