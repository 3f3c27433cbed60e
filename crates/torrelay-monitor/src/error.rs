//! Error types for completion monitoring.

use thiserror::Error;
use torrelay_torrent_core::{TorrentError, TorrentHandle};

/// Failures that end a monitor loop without a terminal engine state.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The engine could not be queried; reconnecting is the caller's concern.
    #[error("download engine unavailable while monitoring")]
    EngineUnavailable {
        /// Handle being monitored.
        handle: TorrentHandle,
        /// Underlying engine failure.
        #[source]
        source: TorrentError,
    },
}

/// Convenience alias for monitor results.
pub type MonitorResult<T> = Result<T, MonitorError>;
