//! # Design
//!
//! - Centralize application-level errors for bootstrap and job admission.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::error::Error;

use thiserror::Error;
use torrelay_torrent_core::{TorrentError, TorrentHandle};

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: torrelay_config::ConfigError,
    },
    /// Telemetry could not be installed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: Box<dyn Error + Send + Sync>,
    },
    /// The download engine failed.
    #[error("download engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: TorrentError,
    },
    /// The relay cache could not be opened or maintained.
    #[error("relay cache operation failed")]
    Cache {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: torrelay_data::DataError,
    },
    /// Staging maintenance failed.
    #[error("staging operation failed")]
    Staging {
        /// Operation identifier.
        operation: &'static str,
        /// Source delivery error.
        source: torrelay_delivery::DeliveryError,
    },
    /// The engine accepted the request but produced no handle.
    #[error("torrent was not admitted")]
    NotAdmitted,
    /// A job for the handle is still running.
    #[error("torrent is already being monitored")]
    AlreadyMonitored {
        /// Handle with a live job.
        handle: TorrentHandle,
    },
    /// A job task panicked or was aborted.
    #[error("job task failed")]
    Join {
        /// Handle of the failed job.
        handle: TorrentHandle,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn engine(operation: &'static str, source: TorrentError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn cache(operation: &'static str, source: torrelay_data::DataError) -> Self {
        Self::Cache { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn engine_errors_keep_their_source() {
        let err = AppError::engine(
            "engine.add",
            TorrentError::unavailable("add", io::Error::other("refused")),
        );
        assert_eq!(err.to_string(), "download engine operation failed");
        let source = err.source().expect("engine source");
        assert_eq!(source.to_string(), "download engine unavailable");
    }

    #[test]
    fn duplicate_job_names_the_handle() {
        let err = AppError::AlreadyMonitored {
            handle: TorrentHandle::new("abc"),
        };
        assert!(matches!(err, AppError::AlreadyMonitored { ref handle } if handle.as_str() == "abc"));
        assert!(err.source().is_none());
    }
}
