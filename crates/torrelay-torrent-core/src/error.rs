//! Error types for download engine adapters.

use std::error::Error;

use thiserror::Error;

use crate::model::TorrentHandle;

/// Primary error type for engine operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// The engine could not be reached or answered with a transport failure.
    #[error("download engine unavailable")]
    Unavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The engine refused the request.
    #[error("download engine rejected request")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Engine supplied detail.
        detail: String,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent handle.
        handle: TorrentHandle,
    },
}

impl TorrentError {
    /// Wrap an arbitrary transport failure as engine unavailability.
    pub fn unavailable(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Unavailable {
            operation,
            source: source.into(),
        }
    }
}

/// Convenience alias for engine operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
