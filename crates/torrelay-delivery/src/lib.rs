#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused)]
#![allow(clippy::module_name_repetitions)]

//! Size-aware delivery of downloaded files over a size-limited channel.
//!
//! Layout: `channel.rs` (primary and relay transport traits), `classify.rs`
//! (strategy selection), `split.rs` (gzip part writer), `relay.rs` (cached
//! relay uploads), `staging.rs` (scratch space), `pipeline.rs` (orchestration),
//! `error.rs` (delivery failures).

pub mod channel;
pub mod classify;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod split;
pub mod staging;

pub use channel::{
    ChannelError, ChannelResult, ChatId, DocumentSource, PrimaryChannel, RelayChannel,
    RelayReceipt, UploadProgress,
};
pub use classify::{DeliveryPlan, DeliveryStrategy, PlanReason, classify};
pub use error::{DeliveryError, DeliveryResult};
pub use pipeline::{Delivered, DeliveryPipeline, DeliveryRequest};
pub use relay::RelayUploader;
pub use split::{
    ChunkManifest, ChunkPart, ChunkSplitter, GzipArchiver, PartArchiver, chunk_lengths,
    expected_parts, part_name,
};
pub use staging::{PurgeReport, StagingArea, StagingDir};
