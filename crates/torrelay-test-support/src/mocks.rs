//! Scripted doubles for the engine and both messaging channels.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use torrelay_data::RelayMediaKind;
use torrelay_delivery::{
    ChannelError, ChannelResult, ChatId, DocumentSource, PrimaryChannel, RelayChannel,
    RelayReceipt, UploadProgress,
};
use torrelay_torrent_core::{
    DownloadEngine, TorrentDescriptor, TorrentError, TorrentHandle, TorrentResult, TorrentSnapshot,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted engine answer to a snapshot poll.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report this snapshot.
    Snapshot(TorrentSnapshot),
    /// Report the handle as unknown.
    Missing,
    /// Fail with a transport error.
    Unavailable,
}

#[derive(Default)]
struct Script {
    steps: Vec<ScriptStep>,
    cursor: usize,
    polls: usize,
}

#[derive(Default)]
struct EngineBook {
    scripts: HashMap<TorrentHandle, Script>,
    files: HashMap<TorrentHandle, Vec<PathBuf>>,
    added: Vec<TorrentDescriptor>,
    removed: Vec<(TorrentHandle, bool)>,
    next_handle: Option<TorrentHandle>,
}

/// Engine that replays scripted snapshots; the last step repeats forever.
#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<EngineBook>,
}

impl ScriptedEngine {
    /// Empty engine; unknown handles report `None`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answers for `handle`.
    pub fn script(&self, handle: &TorrentHandle, steps: Vec<ScriptStep>) {
        lock(&self.state).scripts.insert(
            handle.clone(),
            Script {
                steps,
                ..Script::default()
            },
        );
    }

    /// Files reported once `handle` completes.
    pub fn set_files(&self, handle: &TorrentHandle, files: Vec<PathBuf>) {
        lock(&self.state).files.insert(handle.clone(), files);
    }

    /// Handle returned by the next `add` call.
    pub fn set_next_handle(&self, handle: Option<TorrentHandle>) {
        lock(&self.state).next_handle = handle;
    }

    /// Snapshot polls made for `handle`.
    #[must_use]
    pub fn polls(&self, handle: &TorrentHandle) -> usize {
        lock(&self.state)
            .scripts
            .get(handle)
            .map_or(0, |script| script.polls)
    }

    /// Descriptors admitted so far.
    #[must_use]
    pub fn added(&self) -> Vec<TorrentDescriptor> {
        lock(&self.state).added.clone()
    }

    /// `(handle, delete_files)` pairs passed to `remove`.
    #[must_use]
    pub fn removed(&self) -> Vec<(TorrentHandle, bool)> {
        lock(&self.state).removed.clone()
    }
}

#[async_trait]
impl DownloadEngine for ScriptedEngine {
    async fn add(&self, descriptor: TorrentDescriptor) -> TorrentResult<Option<TorrentHandle>> {
        let mut state = lock(&self.state);
        state.added.push(descriptor);
        Ok(state.next_handle.clone())
    }

    async fn snapshot(&self, handle: &TorrentHandle) -> TorrentResult<Option<TorrentSnapshot>> {
        let step = {
            let mut state = lock(&self.state);
            let Some(script) = state.scripts.get_mut(handle) else {
                return Ok(None);
            };
            script.polls += 1;
            let Some(last) = script.steps.len().checked_sub(1) else {
                return Ok(None);
            };
            let step = script.steps[script.cursor.min(last)].clone();
            script.cursor += 1;
            step
        };
        match step {
            ScriptStep::Snapshot(snapshot) => Ok(Some(snapshot)),
            ScriptStep::Missing => Ok(None),
            ScriptStep::Unavailable => Err(TorrentError::unavailable(
                "snapshot",
                io::Error::new(io::ErrorKind::ConnectionRefused, "engine offline"),
            )),
        }
    }

    async fn list_files(&self, handle: &TorrentHandle) -> TorrentResult<Vec<PathBuf>> {
        lock(&self.state)
            .files
            .get(handle)
            .cloned()
            .ok_or_else(|| TorrentError::NotFound {
                handle: handle.clone(),
            })
    }

    async fn remove(&self, handle: &TorrentHandle, delete_files: bool) -> TorrentResult<()> {
        lock(&self.state).removed.push((handle.clone(), delete_files));
        Ok(())
    }
}

/// Message recorded by [`RecordingPrimaryChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    /// Text message.
    Text {
        /// Recipient.
        chat: ChatId,
        /// Body.
        text: String,
    },
    /// Document message.
    Document {
        /// Recipient.
        chat: ChatId,
        /// Payload source.
        source: DocumentSource,
        /// Declared file name.
        file_name: String,
        /// Caption, if any.
        caption: Option<String>,
    },
}

#[derive(Default)]
struct PrimaryState {
    sent: Vec<SentMessage>,
    document_calls: usize,
}

/// Primary channel that records every message and fails on request.
///
/// Documents read from disk are rejected when they exceed the advertised
/// maximum size, as the real transport would.
pub struct RecordingPrimaryChannel {
    max_document_size: u64,
    fail_document_call: Option<usize>,
    reject_relay_documents: bool,
    text_delay: Duration,
    state: Mutex<PrimaryState>,
}

impl RecordingPrimaryChannel {
    /// Channel accepting documents up to `max_document_size` bytes.
    #[must_use]
    pub fn new(max_document_size: u64) -> Self {
        Self {
            max_document_size,
            fail_document_call: None,
            reject_relay_documents: false,
            text_delay: Duration::ZERO,
            state: Mutex::default(),
        }
    }

    /// Fail the `call`-th document send (1-based).
    #[must_use]
    pub const fn failing_document_call(mut self, call: usize) -> Self {
        self.fail_document_call = Some(call);
        self
    }

    /// Reject every document sent by relay identifier.
    #[must_use]
    pub const fn rejecting_relay_documents(mut self) -> Self {
        self.reject_relay_documents = true;
        self
    }

    /// Stall every text message for `delay` before recording it.
    #[must_use]
    pub const fn with_text_delay(mut self, delay: Duration) -> Self {
        self.text_delay = delay;
        self
    }

    /// Messages delivered so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    /// Document messages delivered so far.
    #[must_use]
    pub fn documents(&self) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|message| matches!(message, SentMessage::Document { .. }))
            .collect()
    }

    /// Text bodies delivered so far.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Text { text, .. } => Some(text),
                SentMessage::Document { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl PrimaryChannel for RecordingPrimaryChannel {
    async fn send_text(&self, chat: ChatId, text: &str) -> ChannelResult<()> {
        if !self.text_delay.is_zero() {
            tokio::time::sleep(self.text_delay).await;
        }
        lock(&self.state).sent.push(SentMessage::Text {
            chat,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        document: DocumentSource,
        file_name: &str,
        caption: Option<&str>,
    ) -> ChannelResult<()> {
        let mut state = lock(&self.state);
        state.document_calls += 1;
        if self.fail_document_call == Some(state.document_calls) {
            return Err(ChannelError::Rejected {
                operation: "send_document",
                detail: "scripted failure".to_string(),
            });
        }
        if self.reject_relay_documents && matches!(document, DocumentSource::Relay(_)) {
            return Err(ChannelError::Rejected {
                operation: "send_document",
                detail: "unknown relay identifier".to_string(),
            });
        }
        if let DocumentSource::Path(path) = &document {
            let Ok(metadata) = std::fs::metadata(path) else {
                return Err(ChannelError::Rejected {
                    operation: "send_document",
                    detail: format!("missing file {}", path.display()),
                });
            };
            if metadata.len() > self.max_document_size {
                return Err(ChannelError::Rejected {
                    operation: "send_document",
                    detail: format!(
                        "{} is {} bytes, limit is {}",
                        path.display(),
                        metadata.len(),
                        self.max_document_size
                    ),
                });
            }
        }
        state.sent.push(SentMessage::Document {
            chat,
            source: document,
            file_name: file_name.to_string(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    fn max_document_size(&self) -> u64 {
        self.max_document_size
    }
}

/// Scripted answer of [`ScriptedRelayChannel::upload`].
#[derive(Debug, Clone)]
pub enum RelayResponse {
    /// Succeed with a generated receipt.
    Success,
    /// Ask the caller to back off.
    RateLimited(Duration),
    /// Fail outright.
    Fail,
}

#[derive(Default)]
struct RelayState {
    responses: VecDeque<RelayResponse>,
    uploads: Vec<(PathBuf, Instant)>,
}

/// Relay channel answering uploads from a queue; succeeds once it runs dry.
pub struct ScriptedRelayChannel {
    reachable: AtomicBool,
    state: Mutex<RelayState>,
}

impl Default for ScriptedRelayChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRelayChannel {
    /// Reachable relay that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            state: Mutex::default(),
        }
    }

    /// Queue answers for upcoming uploads.
    pub fn push_responses(&self, responses: impl IntoIterator<Item = RelayResponse>) {
        lock(&self.state).responses.extend(responses);
    }

    /// Toggle what `resolve` reports.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of upload attempts.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        lock(&self.state).uploads.len()
    }

    /// Instants at which uploads were attempted.
    #[must_use]
    pub fn upload_instants(&self) -> Vec<Instant> {
        lock(&self.state)
            .uploads
            .iter()
            .map(|(_, instant)| *instant)
            .collect()
    }
}

#[async_trait]
impl RelayChannel for ScriptedRelayChannel {
    async fn upload(
        &self,
        storage_chat: ChatId,
        file_path: &Path,
        file_name: &str,
        progress: Option<UploadProgress>,
    ) -> ChannelResult<RelayReceipt> {
        let (attempt, response) = {
            let mut state = lock(&self.state);
            state.uploads.push((file_path.to_path_buf(), Instant::now()));
            let response = state.responses.pop_front().unwrap_or(RelayResponse::Success);
            (state.uploads.len(), response)
        };
        match response {
            RelayResponse::Success => {
                let size = std::fs::metadata(file_path).map_or(0, |metadata| metadata.len());
                if let Some(progress) = progress {
                    progress(size, size);
                }
                Ok(RelayReceipt {
                    relay_id: format!("relay-{file_name}-{attempt}"),
                    relay_unique_id: format!("unique-{attempt}"),
                    kind: RelayMediaKind::Document,
                    channel_id: storage_chat.0,
                    message_ref: i64::try_from(attempt).unwrap_or_default(),
                })
            }
            RelayResponse::RateLimited(retry_after) => Err(ChannelError::RateLimited { retry_after }),
            RelayResponse::Fail => Err(ChannelError::Unavailable {
                operation: "upload",
                source: Box::new(io::Error::other("relay offline")),
            }),
        }
    }

    async fn resolve(&self, _storage_chat: ChatId) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
