//! One download request from admission to the delivery summary.

use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use torrelay_delivery::{ChatId, DeliveryError, DeliveryRequest};
use torrelay_events::Event;
use torrelay_monitor::{MonitorOutcome, ObservationReceiver, observation_channel, render_progress};
use torrelay_torrent_core::{TorrentHandle, TorrentSnapshot};
use tracing::{debug, info, warn};

use crate::service::{ServiceInner, lock};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The download completed and delivery was attempted for every file.
    Delivered {
        /// Files delivered successfully.
        sent: usize,
        /// Files reported by the engine.
        total: usize,
    },
    /// The engine reported a terminal failure.
    DownloadFailed {
        /// Human-readable reason.
        reason: String,
    },
    /// The engine stopped answering while monitoring.
    EngineUnavailable,
    /// The job was cancelled.
    Cancelled,
}

/// Final report of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Handle the job monitored.
    pub handle: TorrentHandle,
    /// How it ended.
    pub outcome: JobOutcome,
}

pub(crate) async fn run(
    service: Arc<ServiceInner>,
    chat: ChatId,
    handle: TorrentHandle,
    cancel: CancellationToken,
) -> JobReport {
    let started = Instant::now();
    let (sender, receiver) = observation_channel(service.observation_capacity);
    let consumer = tokio::spawn(consume_progress(
        Arc::clone(&service),
        chat,
        handle.clone(),
        receiver,
        started,
        cancel.clone(),
    ));

    let monitored = service
        .monitor
        .await_completion(&handle, &cancel, |snapshot| {
            sender.send(snapshot.clone());
        })
        .await;
    drop(sender);
    if let Err(err) = consumer.await {
        warn!(handle = %handle, error = %err, "progress consumer failed");
    }
    service.throttle.forget(&handle);

    let outcome = match monitored {
        Ok(MonitorOutcome::Completed(snapshot)) => {
            service.events.publish(Event::DownloadCompleted {
                handle: handle.clone(),
                name: snapshot.name.clone(),
            });
            deliver_files(&service, chat, &handle, &snapshot, &cancel).await
        }
        Ok(MonitorOutcome::Failed(reason)) => {
            let reason = reason.to_string();
            service.events.publish(Event::DownloadFailed {
                handle: handle.clone(),
                reason: reason.clone(),
            });
            notify(&service, chat, &format!("Download failed: {reason}")).await;
            JobOutcome::DownloadFailed { reason }
        }
        Ok(MonitorOutcome::Cancelled) => JobOutcome::Cancelled,
        Err(err) => {
            warn!(handle = %handle, error = %err, "monitoring stopped");
            notify(
                &service,
                chat,
                "Lost contact with the download engine; monitoring stopped.",
            )
            .await;
            JobOutcome::EngineUnavailable
        }
    };
    info!(handle = %handle, outcome = ?outcome, "download job finished");
    JobReport { handle, outcome }
}

async fn consume_progress(
    service: Arc<ServiceInner>,
    chat: ChatId,
    handle: TorrentHandle,
    mut receiver: ObservationReceiver,
    started: Instant,
    cancel: CancellationToken,
) {
    while let Some(snapshot) = receiver.recv().await {
        if !service.throttle.should_emit(&handle, snapshot.progress) {
            continue;
        }
        service.events.publish(Event::Progress {
            handle: handle.clone(),
            progress: snapshot.progress,
            state: snapshot.state.to_string(),
        });
        let text = render_progress(&snapshot, started.elapsed());
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(handle = %handle, "progress update abandoned on cancellation");
                break;
            }
            () = notify(&service, chat, &text) => {}
        }
        service.throttle.record_emitted(&handle, snapshot.progress);
    }
    if receiver.dropped() > 0 {
        info!(handle = %handle, dropped = receiver.dropped(), "progress observations overwritten");
    }
}

async fn deliver_files(
    service: &ServiceInner,
    chat: ChatId,
    handle: &TorrentHandle,
    snapshot: &TorrentSnapshot,
    cancel: &CancellationToken,
) -> JobOutcome {
    let files = match service.engine.list_files(handle).await {
        Ok(files) => files,
        Err(err) => {
            warn!(handle = %handle, error = %err, "failed to list completed files");
            notify(service, chat, "Download finished but its files could not be listed.").await;
            return JobOutcome::DownloadFailed {
                reason: err.to_string(),
            };
        }
    };
    if files.is_empty() {
        notify(service, chat, &format!("No files found for {}.", snapshot.name)).await;
        return JobOutcome::Delivered { sent: 0, total: 0 };
    }

    let total = files.len();
    notify(
        service,
        chat,
        &format!("Download complete: {}\nSending {total} file(s)...", snapshot.name),
    )
    .await;

    let mut sent = 0;
    for (index, file) in files.iter().enumerate() {
        let caption = if total == 1 {
            snapshot.name.clone()
        } else {
            format!("{} ({}/{total})", snapshot.name, index + 1)
        };
        match deliver_one(service, chat, file, caption, cancel).await {
            Ok(()) => sent += 1,
            Err(DeliveryError::Cancelled) => return JobOutcome::Cancelled,
            Err(err) => {
                warn!(handle = %handle, path = %file.display(), error = %err, "file delivery failed");
                notify(
                    service,
                    chat,
                    &format!("Could not send {}: {err}", display_name(file)),
                )
                .await;
            }
        }
    }

    notify(service, chat, &format!("Sent {sent}/{total} files")).await;
    JobOutcome::Delivered { sent, total }
}

async fn deliver_one(
    service: &ServiceInner,
    chat: ChatId,
    file: &Path,
    caption: String,
    cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
    if cancel.is_cancelled() {
        return Err(DeliveryError::Cancelled);
    }
    let size = tokio::fs::metadata(file)
        .await
        .map_err(|source| DeliveryError::Io {
            operation: "stat delivery source",
            path: file.to_path_buf(),
            source,
        })?
        .len();
    service.staging.ensure_capacity(size).await?;

    let scope = service.staging.scope().await?;
    let staging_dir = scope.path().to_path_buf();
    lock(&service.active_scopes).insert(staging_dir.clone());
    let request = DeliveryRequest {
        chat,
        file_path: file.to_path_buf(),
        caption: Some(caption),
        staging_dir: staging_dir.clone(),
    };
    let delivered = service.pipeline.deliver(&request, cancel).await;
    scope.cleanup().await;
    lock(&service.active_scopes).remove(&staging_dir);
    delivered.map(|_| ())
}

async fn notify(service: &ServiceInner, chat: ChatId, text: &str) {
    if let Err(err) = service.primary.send_text(chat, text).await {
        warn!(chat = %chat, error = %err, "failed to send notification");
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}
