use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use torrelay_config::DeliveryLimits;
use torrelay_data::RelayCache;
use torrelay_delivery::{
    ChatId, Delivered, DeliveryError, DeliveryPipeline, DeliveryRequest, DocumentSource,
    RelayUploader,
};
use torrelay_events::{Event, EventBus};
use torrelay_test_support::fixtures::{write_patterned_file, write_random_file};
use torrelay_test_support::mocks::{
    RecordingPrimaryChannel, RelayResponse, ScriptedRelayChannel, SentMessage,
};

const CHAT: ChatId = ChatId(77);
const LIMITS: DeliveryLimits = DeliveryLimits {
    direct_limit: 50_000,
    relay_limit: 200_000,
    chunk_size: 45_000,
};

struct Harness {
    dir: TempDir,
    primary: Arc<RecordingPrimaryChannel>,
    relay: Arc<ScriptedRelayChannel>,
    events: EventBus,
    pipeline: DeliveryPipeline,
}

impl Harness {
    async fn new(primary: RecordingPrimaryChannel, with_relay: bool) -> Result<Self> {
        Self::with_limits(primary, with_relay, LIMITS).await
    }

    async fn with_limits(
        primary: RecordingPrimaryChannel,
        with_relay: bool,
        limits: DeliveryLimits,
    ) -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let primary = Arc::new(primary);
        let relay = Arc::new(ScriptedRelayChannel::new());
        let uploader = if with_relay {
            let cache = RelayCache::open(dir.path().join("relay_cache.db")).await?;
            Some(Arc::new(RelayUploader::new(relay.clone(), cache, ChatId(-100))))
        } else {
            None
        };
        let events = EventBus::new();
        let pipeline = DeliveryPipeline::new(primary.clone(), uploader, limits, events.clone());
        Ok(Self {
            dir,
            primary,
            relay,
            events,
            pipeline,
        })
    }

    fn staging(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    fn request(&self, file_path: &Path) -> DeliveryRequest {
        DeliveryRequest {
            chat: CHAT,
            file_path: file_path.to_path_buf(),
            caption: Some("from torrelay".to_string()),
            staging_dir: self.staging(),
        }
    }

    async fn events(&self) -> Vec<Event> {
        let mut stream = self.events.subscribe(Some(0));
        let mut events = Vec::new();
        while let Ok(Some(envelope)) =
            tokio::time::timeout(Duration::from_millis(50), stream.next()).await
        {
            events.push(envelope.event);
        }
        events
    }

    async fn event_kinds(&self) -> Vec<&'static str> {
        self.events().await.iter().map(Event::kind).collect()
    }
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| entries.count())
}

#[tokio::test]
async fn small_file_is_sent_directly() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    let file = write_patterned_file(harness.dir.path(), "clip.mp4", 40_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Direct);
    assert_eq!(
        harness.primary.sent(),
        vec![SentMessage::Document {
            chat: CHAT,
            source: DocumentSource::Path(file.clone()),
            file_name: "clip.mp4".to_string(),
            caption: Some("from torrelay".to_string()),
        }]
    );
    assert_eq!(harness.relay.upload_count(), 0);
    assert_eq!(staged_files(&harness.staging()), 0);
    assert_eq!(
        harness.event_kinds().await,
        vec!["delivery_started", "delivery_completed"]
    );
    Ok(())
}

#[tokio::test]
async fn direct_failure_does_not_fall_back() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000).failing_document_call(1), true).await?;
    let file = write_patterned_file(harness.dir.path(), "clip.mp4", 1_000)?;

    let err = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await
        .expect_err("direct send fails");

    assert!(matches!(err, DeliveryError::ChannelSend { .. }));
    assert!(harness.primary.sent().is_empty());
    assert_eq!(harness.relay.upload_count(), 0);
    Ok(())
}

#[tokio::test]
async fn oversized_file_without_relay_is_split() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), false).await?;
    let file = write_patterned_file(harness.dir.path(), "disk.img", 100_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 3 });
    let names: Vec<String> = harness
        .primary
        .documents()
        .into_iter()
        .filter_map(|message| match message {
            SentMessage::Document { file_name, .. } => Some(file_name),
            SentMessage::Text { .. } => None,
        })
        .collect();
    assert_eq!(names, ["disk.img.gz.001", "disk.img.gz.002", "disk.img.gz.003"]);

    let texts = harness.primary.texts();
    assert_eq!(texts[0], "Part 1/3 of disk.img");
    assert_eq!(texts[2], "Part 3/3 of disk.img");
    assert!(texts[3].contains("cat disk.img.gz.* | gunzip > disk.img"));
    assert_eq!(staged_files(&harness.staging()), 0);

    let kinds = harness.event_kinds().await;
    assert_eq!(kinds.iter().filter(|kind| **kind == "part_sent").count(), 3);
    Ok(())
}

#[tokio::test]
async fn incompressible_parts_fit_the_document_limit() -> Result<()> {
    let limits = DeliveryLimits {
        chunk_size: 49_990,
        ..LIMITS
    };
    let harness = Harness::with_limits(RecordingPrimaryChannel::new(50_000), false, limits).await?;
    let file = write_random_file(harness.dir.path(), "archive.7z", 120_000, 42)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 3 });
    assert_eq!(harness.primary.documents().len(), 3);
    assert_eq!(staged_files(&harness.staging()), 0);
    Ok(())
}

#[tokio::test]
async fn parts_follow_a_smaller_channel_limit() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(30_000), false).await?;
    let file = write_random_file(harness.dir.path(), "archive.7z", 60_000, 7)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 3 });
    assert_eq!(harness.primary.documents().len(), 3);
    Ok(())
}

#[tokio::test]
async fn failing_part_reports_partial_progress_and_cleans_up() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000).failing_document_call(2), false).await?;
    let file = write_patterned_file(harness.dir.path(), "disk.img", 100_000)?;

    let err = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await
        .expect_err("second part fails");

    assert!(matches!(err, DeliveryError::PartialSplit { sent: 1, total: 3, .. }));
    assert_eq!(harness.primary.documents().len(), 1);
    assert_eq!(staged_files(&harness.staging()), 0);
    assert!(harness.event_kinds().await.contains(&"delivery_failed"));
    Ok(())
}

#[tokio::test]
async fn mid_size_file_goes_through_relay_and_is_cached() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 150_000)?;

    let first = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;
    let second = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert!(matches!(first, Delivered::Relay { .. }));
    assert_eq!(first, second);
    assert_eq!(harness.relay.upload_count(), 1);
    assert_eq!(
        harness.primary.texts()[0],
        "movie.mkv exceeds the direct limit; uploading through the relay..."
    );
    assert!(harness.primary.documents().iter().all(|message| matches!(
        message,
        SentMessage::Document {
            source: DocumentSource::Relay(_),
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn relay_upload_progress_is_published() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 150_000)?;

    harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    let progress: Vec<(u64, u64)> = harness
        .events()
        .await
        .into_iter()
        .filter_map(|event| match event {
            Event::RelayUploadProgress {
                sent_bytes,
                total_bytes,
                ..
            } => Some((sent_bytes, total_bytes)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(150_000, 150_000)]);
    Ok(())
}

#[tokio::test]
async fn changed_file_invalidates_cached_identifier() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 150_000)?;
    let request = harness.request(&file);

    harness.pipeline.deliver(&request, &CancellationToken::new()).await?;
    write_patterned_file(harness.dir.path(), "movie.mkv", 160_000)?;
    harness.pipeline.deliver(&request, &CancellationToken::new()).await?;

    assert_eq!(harness.relay.upload_count(), 2);
    Ok(())
}

#[tokio::test]
async fn rate_limit_is_waited_out_and_retried_once() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    harness
        .relay
        .push_responses([RelayResponse::RateLimited(Duration::from_secs(3))]);
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 150_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert!(matches!(delivered, Delivered::Relay { .. }));
    let instants = harness.relay.upload_instants();
    assert_eq!(instants.len(), 2);
    assert!(instants[1].duration_since(instants[0]) >= Duration::from_secs(3));
    assert_eq!(staged_files(&harness.staging()), 0);
    Ok(())
}

#[tokio::test]
async fn repeated_rate_limit_falls_back_to_split() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    harness.relay.push_responses([
        RelayResponse::RateLimited(Duration::from_millis(10)),
        RelayResponse::RateLimited(Duration::from_millis(10)),
    ]);
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 60_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 2 });
    assert_eq!(harness.relay.upload_count(), 2);
    assert!(harness.event_kinds().await.contains(&"relay_fallback"));
    Ok(())
}

#[tokio::test]
async fn relay_send_failure_falls_back_to_split() -> Result<()> {
    let harness = Harness::new(
        RecordingPrimaryChannel::new(50_000).rejecting_relay_documents(),
        true,
    )
    .await?;
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 60_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 2 });
    assert_eq!(harness.relay.upload_count(), 1);
    assert_eq!(harness.primary.documents().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_relay_is_skipped() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    harness.relay.set_reachable(false);
    let file = write_patterned_file(harness.dir.path(), "movie.mkv", 60_000)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 2 });
    assert_eq!(harness.relay.upload_count(), 0);
    Ok(())
}

#[tokio::test]
async fn file_beyond_relay_limit_is_split() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), true).await?;
    let file = write_patterned_file(harness.dir.path(), "huge.iso", 200_001)?;

    let delivered = harness
        .pipeline
        .deliver(&harness.request(&file), &CancellationToken::new())
        .await?;

    assert_eq!(delivered, Delivered::Split { parts: 5 });
    assert_eq!(harness.relay.upload_count(), 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_delivery_sends_nothing() -> Result<()> {
    let harness = Harness::new(RecordingPrimaryChannel::new(50_000), false).await?;
    let file = write_patterned_file(harness.dir.path(), "disk.img", 100_000)?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .pipeline
        .deliver(&harness.request(&file), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, DeliveryError::Cancelled));
    assert!(harness.primary.sent().is_empty());
    assert_eq!(staged_files(&harness.staging()), 0);
    Ok(())
}
