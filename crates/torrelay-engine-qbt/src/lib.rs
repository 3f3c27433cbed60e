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

//! qBittorrent Web API adapter for the [`DownloadEngine`] trait.
//!
//! Layout: `client.rs` (session handling and trait implementation),
//! `model.rs` (wire DTOs and their conversion into domain snapshots).
//!
//! [`DownloadEngine`]: torrelay_torrent_core::DownloadEngine

pub mod client;
pub mod model;

pub use client::QbtEngine;
pub use model::{QbtFile, QbtTorrentInfo, magnet_info_hash};
