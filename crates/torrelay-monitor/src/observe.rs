//! Bounded hand-off of snapshots from a monitor to its progress consumer.
//!
//! The channel never blocks the monitor: when the consumer falls behind, the
//! oldest buffered snapshots are overwritten and the consumer resumes with the
//! newest retained one.

use tokio::sync::broadcast;
use torrelay_torrent_core::TorrentSnapshot;
use tracing::debug;

/// Create a bounded drop-oldest channel holding at most `capacity` snapshots.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn observation_channel(capacity: usize) -> (ObservationSender, ObservationReceiver) {
    assert!(capacity > 0, "observation channel capacity must be positive");
    let (sender, receiver) = broadcast::channel(capacity);
    (
        ObservationSender { sender },
        ObservationReceiver {
            receiver,
            dropped: 0,
        },
    )
}

/// Producer half held by the monitor callback.
#[derive(Debug, Clone)]
pub struct ObservationSender {
    sender: broadcast::Sender<TorrentSnapshot>,
}

impl ObservationSender {
    /// Publish a snapshot; returns `false` once the consumer is gone.
    pub fn send(&self, snapshot: TorrentSnapshot) -> bool {
        self.sender.send(snapshot).is_ok()
    }
}

/// Consumer half; skips overwritten snapshots and counts them.
#[derive(Debug)]
pub struct ObservationReceiver {
    receiver: broadcast::Receiver<TorrentSnapshot>,
    dropped: u64,
}

impl ObservationReceiver {
    /// Wait for the next retained snapshot; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<TorrentSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped = self.dropped.saturating_add(skipped);
                    debug!(skipped, total = self.dropped, "progress consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots overwritten before this receiver read them.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
