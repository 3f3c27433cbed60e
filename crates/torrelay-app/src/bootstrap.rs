//! Construction of the service from configuration.

use std::sync::Arc;

use torrelay_config::{LoggingSettings, TorrelayConfig};
use torrelay_data::RelayCache;
use torrelay_delivery::{ChatId, PrimaryChannel, RelayChannel, RelayUploader};
use torrelay_engine_qbt::QbtEngine;
use torrelay_events::EventBus;
use torrelay_telemetry::{LogFormat, LoggingConfig, build_sha, init_logging};
use torrelay_torrent_core::DownloadEngine;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::service::{ServiceDeps, TorrelayService};

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns [`AppError::Config`] when a variable is malformed.
pub fn load_config() -> AppResult<TorrelayConfig> {
    TorrelayConfig::from_env().map_err(|source| AppError::Config {
        operation: "config.from_env",
        source,
    })
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`AppError::Telemetry`] when the format is unknown or a subscriber
/// is already installed.
pub fn init_telemetry(settings: &LoggingSettings) -> AppResult<()> {
    let format = match settings.format.as_deref() {
        Some(raw) => raw.parse::<LogFormat>().map_err(|err| AppError::Telemetry {
            operation: "telemetry.format",
            source: err.into(),
        })?,
        None => LogFormat::infer(),
    };
    init_logging(&LoggingConfig {
        level: &settings.level,
        format,
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::Telemetry {
        operation: "telemetry.init",
        source: err.into(),
    })
}

/// Build the service against the configured qBittorrent instance.
///
/// `relay` is only used when the configuration carries relay settings.
///
/// # Errors
///
/// Returns [`AppError::Engine`] when the HTTP client cannot be built and
/// [`AppError::Cache`] when the relay cache cannot be opened.
pub async fn bootstrap(
    config: TorrelayConfig,
    primary: Arc<dyn PrimaryChannel>,
    relay: Option<Arc<dyn RelayChannel>>,
) -> AppResult<TorrelayService> {
    let engine =
        QbtEngine::new(&config.engine).map_err(|err| AppError::engine("qbt.new", err))?;
    info!(url = %config.engine.base_url, "using qBittorrent engine");
    build_service(config, Arc::new(engine), primary, relay).await
}

/// Build the service around an arbitrary engine.
///
/// # Errors
///
/// Returns [`AppError::Cache`] when the relay cache cannot be opened.
pub async fn build_service(
    config: TorrelayConfig,
    engine: Arc<dyn DownloadEngine>,
    primary: Arc<dyn PrimaryChannel>,
    relay: Option<Arc<dyn RelayChannel>>,
) -> AppResult<TorrelayService> {
    let uploader = match (relay, config.relay.as_ref()) {
        (Some(channel), Some(settings)) => {
            let cache = RelayCache::open(&settings.cache_path)
                .await
                .map_err(|err| AppError::cache("relay_cache.open", err))?;
            info!(
                cache = %settings.cache_path.display(),
                storage_chat = settings.storage_chat_id,
                "relay transport enabled"
            );
            Some(Arc::new(RelayUploader::new(
                channel,
                cache,
                ChatId(settings.storage_chat_id),
            )))
        }
        (Some(_), None) => {
            warn!("relay channel supplied without relay settings; relay disabled");
            None
        }
        (None, _) => None,
    };

    let deps = ServiceDeps {
        engine,
        primary,
        relay: uploader,
        events: EventBus::new(),
    };
    Ok(TorrelayService::new(deps, config))
}
