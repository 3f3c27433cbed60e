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

//! Typed configuration for the torrelay services.
//!
//! Layout: `model.rs` (typed settings and defaults), `loader.rs` (environment
//! parsing and validation), `error.rs` (configuration failures).

pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use loader::ENV_PREFIX;
pub use model::{
    DeliveryLimits, EngineSettings, LoggingSettings, MonitorSettings, RelaySettings,
    StagingSettings, ThrottleSettings, TorrelayConfig,
};
