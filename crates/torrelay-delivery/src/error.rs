//! Error types for delivery operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use torrelay_data::DataError;

use crate::channel::ChannelError;

/// Failures surfaced by the delivery pipeline and its components.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Filesystem access failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Writing a split part failed; written parts were removed.
    #[error("file split failed")]
    Split {
        /// File being split.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The splitter produced fewer parts than the file size requires.
    #[error("file split produced too few parts")]
    SplitIncomplete {
        /// File being split.
        path: PathBuf,
        /// Parts written.
        produced: usize,
        /// Parts required.
        expected: usize,
    },
    /// The relay rejected or failed an upload.
    #[error("relay upload failed")]
    RelayUnavailable {
        /// File being uploaded.
        path: PathBuf,
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// The relay kept failing after its advised back-off.
    #[error("relay upload failed after retry")]
    TransientRelay {
        /// File being uploaded.
        path: PathBuf,
        /// Error from the retried attempt.
        #[source]
        source: ChannelError,
    },
    /// A primary channel send failed.
    #[error("channel send failed")]
    ChannelSend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// Some split parts were delivered before a part failed.
    #[error("split delivery stopped early")]
    PartialSplit {
        /// Parts delivered.
        sent: usize,
        /// Parts in the manifest.
        total: usize,
        /// Failure of the first undelivered part.
        #[source]
        source: ChannelError,
    },
    /// Staging space would exceed its configured bound.
    #[error("insufficient staging space")]
    InsufficientSpace {
        /// Bytes the delivery needs.
        required: u64,
        /// Bytes still allowed under the bound.
        available: u64,
    },
    /// The caller abandoned the delivery.
    #[error("delivery cancelled")]
    Cancelled,
    /// The relay cache could not be read.
    #[error("relay cache failure")]
    Cache {
        /// Underlying data layer error.
        #[source]
        source: DataError,
    },
    /// A blocking worker task panicked or was aborted.
    #[error("delivery worker failed")]
    Worker {
        /// Operation identifier.
        operation: &'static str,
        /// Join failure.
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Convenience alias for delivery results.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

impl DeliveryError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn partial_split_preserves_channel_source() {
        let err = DeliveryError::PartialSplit {
            sent: 2,
            total: 5,
            source: ChannelError::Rejected {
                operation: "send_document",
                detail: "file too big".to_string(),
            },
        };
        assert_eq!(err.to_string(), "split delivery stopped early");
        let source = err.source().expect("source preserved");
        assert_eq!(source.to_string(), "channel rejected request");
    }
}
