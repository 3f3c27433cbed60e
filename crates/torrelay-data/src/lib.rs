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

//! Data access layer for torrelay: migrations and the relay identifier cache.

pub mod error;
pub mod relay_cache;

pub use error::{DataError, Result as DataResult};
pub use relay_cache::{RelayCache, RelayCacheRecord, RelayCacheStats, RelayMediaKind};
