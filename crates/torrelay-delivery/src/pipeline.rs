//! End-to-end delivery of one file over the primary channel.
//!
//! # Design
//! - The strategy is decided per file from its size and relay reachability.
//! - Relay failures fall back to splitting; direct failures do not fall back.
//! - Split parts are sent in order, each deleted right after it is sent. A
//!   failed part stops the delivery and removes the parts still on disk.
//! - Split parts are sized so a worst-case gzip part still fits the primary
//!   channel's document limit.
//! - Every channel call is raced against the cancellation token.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use torrelay_config::DeliveryLimits;
use torrelay_events::{Event, EventBus};
use tracing::{info, warn};

use crate::channel::{ChannelError, ChatId, DocumentSource, PrimaryChannel, UploadProgress};
use crate::classify::{DeliveryPlan, DeliveryStrategy, classify};
use crate::error::{DeliveryError, DeliveryResult};
use crate::relay::RelayUploader;
use crate::split::{ChunkManifest, ChunkSplitter};

/// Relay upload progress is published once per this many percent.
const RELAY_PROGRESS_STEP_PERCENT: u64 = 10;

/// One file to deliver.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Recipient.
    pub chat: ChatId,
    /// File to deliver.
    pub file_path: PathBuf,
    /// Caption for the document (first part when split).
    pub caption: Option<String>,
    /// Directory that receives split parts.
    pub staging_dir: PathBuf,
}

/// How a delivery finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// Sent as one document from disk.
    Direct,
    /// Re-sent by relay identifier.
    Relay {
        /// Identifier used for the send.
        relay_id: String,
    },
    /// Sent as reconstructable parts.
    Split {
        /// Number of parts sent.
        parts: usize,
    },
}

impl Delivered {
    /// Strategy that completed the delivery.
    #[must_use]
    pub const fn strategy(&self) -> DeliveryStrategy {
        match self {
            Self::Direct => DeliveryStrategy::Direct,
            Self::Relay { .. } => DeliveryStrategy::Relay,
            Self::Split { .. } => DeliveryStrategy::Split,
        }
    }
}

/// Chooses and executes a delivery strategy per file.
pub struct DeliveryPipeline {
    primary: Arc<dyn PrimaryChannel>,
    relay: Option<Arc<RelayUploader>>,
    splitter: ChunkSplitter,
    limits: DeliveryLimits,
    events: EventBus,
}

impl DeliveryPipeline {
    /// Build a pipeline; `relay` is `None` when no relay is configured.
    ///
    /// The split chunk size is lowered when `limits.chunk_size` could produce
    /// parts larger than the direct limit or the channel's document limit.
    #[must_use]
    pub fn new(
        primary: Arc<dyn PrimaryChannel>,
        relay: Option<Arc<RelayUploader>>,
        limits: DeliveryLimits,
        events: EventBus,
    ) -> Self {
        let chunk_size = limits.effective_chunk_size(primary.max_document_size());
        if chunk_size < limits.chunk_size {
            warn!(
                configured = limits.chunk_size,
                effective = chunk_size,
                "chunk size lowered to keep split parts under the document limit"
            );
        }
        Self {
            splitter: ChunkSplitter::new(chunk_size),
            primary,
            relay,
            limits,
            events,
        }
    }

    /// Replace the splitter, e.g. to use a different part archiver.
    #[must_use]
    pub fn with_splitter(mut self, splitter: ChunkSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Relay uploader, when configured.
    #[must_use]
    pub fn relay(&self) -> Option<&Arc<RelayUploader>> {
        self.relay.as_ref()
    }

    /// Decide the strategy for a file of `file_size` bytes.
    pub async fn plan(&self, file_size: u64) -> DeliveryPlan {
        let direct_limit = self.limits.direct_limit.min(self.primary.max_document_size());
        let relay_limit = match &self.relay {
            Some(relay) if file_size > direct_limit && relay.is_available().await => {
                Some(self.limits.relay_limit)
            }
            _ => None,
        };
        classify(file_size, direct_limit, relay_limit)
    }

    /// Deliver one file.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::ChannelSend`] when a direct send fails.
    /// - [`DeliveryError::PartialSplit`] when a part fails after others were sent.
    /// - [`DeliveryError::Split`] or [`DeliveryError::SplitIncomplete`] when
    ///   the file cannot be split.
    /// - [`DeliveryError::Cancelled`] when `cancel` fires first.
    pub async fn deliver(
        &self,
        request: &DeliveryRequest,
        cancel: &CancellationToken,
    ) -> DeliveryResult<Delivered> {
        let path = &request.file_path;
        let file_size = tokio::fs::metadata(path)
            .await
            .map_err(|source| DeliveryError::io("stat delivery source", path, source))?
            .len();
        let plan = self.plan(file_size).await;
        info!(
            path = %path.display(),
            size = file_size,
            strategy = %plan.strategy,
            reason = ?plan.reason,
            "delivery planned"
        );
        self.events.publish(Event::DeliveryStarted {
            path: path.clone(),
            strategy: plan.strategy.as_str().to_string(),
            size_bytes: file_size,
        });

        let result = match plan.strategy {
            DeliveryStrategy::Direct => self.deliver_direct(request, cancel).await,
            DeliveryStrategy::Relay => match self.deliver_via_relay(request, cancel).await {
                Err(DeliveryError::Cancelled) => Err(DeliveryError::Cancelled),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "relay delivery failed; falling back to split");
                    self.events.publish(Event::RelayFallback {
                        path: path.clone(),
                        reason: err.to_string(),
                    });
                    self.deliver_split(request, cancel).await
                }
                delivered => delivered,
            },
            DeliveryStrategy::Split => self.deliver_split(request, cancel).await,
        };

        match &result {
            Ok(delivered) => {
                info!(path = %path.display(), strategy = %delivered.strategy(), "delivery completed");
                self.events.publish(Event::DeliveryCompleted {
                    path: path.clone(),
                    strategy: delivered.strategy().as_str().to_string(),
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "delivery failed");
                self.events.publish(Event::DeliveryFailed {
                    path: path.clone(),
                    message: err.to_string(),
                });
            }
        }
        result
    }

    async fn deliver_direct(
        &self,
        request: &DeliveryRequest,
        cancel: &CancellationToken,
    ) -> DeliveryResult<Delivered> {
        let file_name = file_name(request);
        cancellable(
            cancel,
            self.primary.send_document(
                request.chat,
                DocumentSource::Path(request.file_path.clone()),
                &file_name,
                request.caption.as_deref(),
            ),
        )
        .await?
        .map_err(|source| DeliveryError::ChannelSend {
            operation: "send_document",
            source,
        })?;
        Ok(Delivered::Direct)
    }

    async fn deliver_via_relay(
        &self,
        request: &DeliveryRequest,
        cancel: &CancellationToken,
    ) -> DeliveryResult<Delivered> {
        let Some(relay) = &self.relay else {
            return Err(DeliveryError::RelayUnavailable {
                path: request.file_path.clone(),
                source: ChannelError::Rejected {
                    operation: "relay",
                    detail: "relay not configured".to_string(),
                },
            });
        };
        let file_name = file_name(request);
        let announcement = format!("{file_name} exceeds the direct limit; uploading through the relay...");
        if let Err(err) = cancellable(cancel, self.primary.send_text(request.chat, &announcement)).await? {
            warn!(path = %request.file_path.display(), error = %err, "failed to announce relay upload");
        }
        let progress = relay_progress(self.events.clone(), &request.file_path);
        let record =
            cancellable(cancel, relay.upload(&request.file_path, Some(progress), false)).await??;
        cancellable(
            cancel,
            self.primary.send_document(
                request.chat,
                DocumentSource::Relay(record.relay_id.clone()),
                &file_name,
                request.caption.as_deref(),
            ),
        )
        .await?
        .map_err(|source| DeliveryError::ChannelSend {
            operation: "send_document_by_relay_id",
            source,
        })?;
        Ok(Delivered::Relay {
            relay_id: record.relay_id,
        })
    }

    async fn deliver_split(
        &self,
        request: &DeliveryRequest,
        cancel: &CancellationToken,
    ) -> DeliveryResult<Delivered> {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }
        let manifest = self
            .splitter
            .split_blocking(request.file_path.clone(), request.staging_dir.clone())
            .await?;
        let outcome = self.send_parts(request, &manifest, cancel).await;
        // Sent parts are already gone; this removes whatever a failure left.
        manifest.cleanup();
        let total = outcome?;

        cancellable(
            cancel,
            self.primary
                .send_text(request.chat, &manifest.reconstruction_hint()),
        )
        .await?
        .map_err(|source| DeliveryError::ChannelSend {
            operation: "send_reconstruction_hint",
            source,
        })?;
        Ok(Delivered::Split { parts: total })
    }

    async fn send_parts(
        &self,
        request: &DeliveryRequest,
        manifest: &ChunkManifest,
        cancel: &CancellationToken,
    ) -> DeliveryResult<usize> {
        let total = manifest.total();
        for (sent, part) in manifest.parts.iter().enumerate() {
            let announcement = format!("Part {}/{total} of {}", part.index, manifest.file_name);
            let caption = if part.index == 1 {
                request.caption.as_deref()
            } else {
                None
            };
            let part_name = part.file_name();

            let send = async {
                self.primary.send_text(request.chat, &announcement).await?;
                self.primary
                    .send_document(
                        request.chat,
                        DocumentSource::Path(part.path.clone()),
                        &part_name,
                        caption,
                    )
                    .await
            };
            cancellable(cancel, send)
                .await?
                .map_err(|source| DeliveryError::PartialSplit {
                    sent,
                    total,
                    source,
                })?;

            if let Err(err) = tokio::fs::remove_file(&part.path).await {
                warn!(part = %part.path.display(), error = %err, "failed to remove sent part");
            }
            self.events.publish(Event::PartSent {
                path: request.file_path.clone(),
                index: part.index,
                total,
            });
        }
        Ok(total)
    }
}

fn file_name(request: &DeliveryRequest) -> String {
    request
        .file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Publishes relay upload progress each time it crosses a step boundary.
fn relay_progress(events: EventBus, path: &Path) -> UploadProgress {
    let path = path.to_path_buf();
    let last_step = AtomicU64::new(u64::MAX);
    Arc::new(move |sent_bytes, total_bytes| {
        let percent = u128::from(sent_bytes.min(total_bytes)) * 100 / u128::from(total_bytes.max(1));
        let step = u64::try_from(percent).unwrap_or(100) / RELAY_PROGRESS_STEP_PERCENT;
        if last_step.swap(step, Ordering::Relaxed) != step {
            events.publish(Event::RelayUploadProgress {
                path: path.clone(),
                sent_bytes,
                total_bytes,
            });
        }
    })
}

async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> DeliveryResult<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DeliveryError::Cancelled),
        output = future => Ok(output),
    }
}
