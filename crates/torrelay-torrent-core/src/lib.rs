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

//! Engine-agnostic torrent interfaces and DTOs.
//!
//! Layout: `model/` (handles, descriptors, snapshots, engine states),
//! `service/` (the `DownloadEngine` trait), `error.rs` (engine failures).

pub mod error;
pub mod model;
pub mod service;

pub use error::{TorrentError, TorrentResult};
pub use model::{EngineState, StatePhase, TorrentDescriptor, TorrentHandle, TorrentSnapshot};
pub use service::DownloadEngine;
