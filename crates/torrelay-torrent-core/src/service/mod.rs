//! Engine trait implemented by download engine adapters.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::TorrentResult;
use crate::model::{TorrentDescriptor, TorrentHandle, TorrentSnapshot};

/// Capability consumed from the external download engine.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Admit a descriptor; `None` when the engine accepted it but no handle
    /// could be resolved.
    async fn add(&self, descriptor: TorrentDescriptor) -> TorrentResult<Option<TorrentHandle>>;

    /// Current snapshot for a handle; `None` when the engine no longer knows it.
    async fn snapshot(&self, handle: &TorrentHandle) -> TorrentResult<Option<TorrentSnapshot>>;

    /// Absolute paths of the payload files that exist on disk.
    async fn list_files(&self, handle: &TorrentHandle) -> TorrentResult<Vec<PathBuf>>;

    /// Remove a torrent, optionally deleting its data.
    async fn remove(&self, handle: &TorrentHandle, delete_files: bool) -> TorrentResult<()>;
}
