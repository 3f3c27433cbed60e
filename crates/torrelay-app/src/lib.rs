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

//! Torrelay service wiring.
//!
//! Layout: `bootstrap.rs` (construction from configuration), `service.rs`
//! (request admission and job registry), `job.rs` (per-download task),
//! `janitor.rs` (periodic cache and staging maintenance), `error.rs`.

/// Construction from configuration.
pub mod bootstrap;
/// Application-level failures.
pub mod error;
/// Periodic maintenance.
pub mod janitor;
mod job;
/// Request admission and job tracking.
pub mod service;

pub use bootstrap::{bootstrap, build_service, init_telemetry, load_config};
pub use error::{AppError, AppResult};
pub use janitor::JanitorReport;
pub use job::{JobOutcome, JobReport};
pub use service::{ServiceDeps, TorrelayService};
