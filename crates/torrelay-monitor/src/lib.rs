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

//! Download completion monitoring and progress throttling.
//!
//! Layout: `monitor.rs` (poll loop over engine states), `throttle.rs` (emission
//! policy per handle), `observe.rs` (bounded monitor-to-consumer channel),
//! `render.rs` (progress text), `error.rs` (monitor failures).

pub mod error;
pub mod monitor;
pub mod observe;
pub mod render;
pub mod throttle;

pub use error::{MonitorError, MonitorResult};
pub use monitor::{CompletionMonitor, DEFAULT_POLL_INTERVAL, FailureReason, MonitorOutcome};
pub use observe::{ObservationReceiver, ObservationSender, observation_channel};
pub use render::{format_duration, format_size, format_speed, progress_bar, render_progress};
pub use throttle::{DEFAULT_MILESTONES, ProgressThrottle, ThrottlePolicy};
