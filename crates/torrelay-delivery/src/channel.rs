//! Messaging capabilities consumed by the delivery pipeline.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use torrelay_data::RelayMediaKind;

/// Conversation identifier on either transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl Display for ChatId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Payload of a document message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// Upload the bytes of a local file.
    Path(PathBuf),
    /// Re-send a payload the relay already holds.
    Relay(String),
}

/// Identifiers returned by a successful relay upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    /// Identifier the primary channel accepts for re-sending.
    pub relay_id: String,
    /// Stable identifier of the payload.
    pub relay_unique_id: String,
    /// Media category chosen by the relay.
    pub kind: RelayMediaKind,
    /// Chat the payload landed in.
    pub channel_id: i64,
    /// Message carrying the payload.
    pub message_ref: i64,
}

/// Upload progress callback receiving `(sent_bytes, total_bytes)`.
pub type UploadProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Transport failures reported by channel implementations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport asked the caller to back off.
    #[error("channel rate limited")]
    RateLimited {
        /// Advised wait before retrying.
        retry_after: Duration,
    },
    /// The transport could not be reached.
    #[error("channel unavailable")]
    Unavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The transport refused the request.
    #[error("channel rejected request")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Transport supplied detail.
        detail: String,
    },
}

/// Convenience alias for channel results.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Size-limited channel the user converses on.
#[async_trait]
pub trait PrimaryChannel: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, chat: ChatId, text: &str) -> ChannelResult<()>;

    /// Send a document from a local path or a relay identifier.
    async fn send_document(
        &self,
        chat: ChatId,
        document: DocumentSource,
        file_name: &str,
        caption: Option<&str>,
    ) -> ChannelResult<()>;

    /// Largest document the channel accepts from a local path.
    fn max_document_size(&self) -> u64;
}

/// Higher-capacity side channel whose uploads the primary channel can re-send.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Upload a local file into `storage_chat`.
    async fn upload(
        &self,
        storage_chat: ChatId,
        file_path: &Path,
        file_name: &str,
        progress: Option<UploadProgress>,
    ) -> ChannelResult<RelayReceipt>;

    /// Whether `storage_chat` is reachable right now.
    async fn resolve(&self, storage_chat: ChatId) -> bool;
}
