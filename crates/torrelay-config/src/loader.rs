//! Environment parsing and validation.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{DeliveryLimits, RelaySettings, TorrelayConfig};

/// Prefix shared by every environment key.
pub const ENV_PREFIX: &str = "TORRELAY_";

const SECS_PER_HOUR: u64 = 3600;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

impl TorrelayConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable cannot be parsed or the resulting
    /// configuration is inconsistent.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Keys are passed with the [`ENV_PREFIX`] already applied.
    ///
    /// # Errors
    ///
    /// Returns an error when a value cannot be parsed or the resulting
    /// configuration is inconsistent.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };
        let mut config = Self::default();

        source.apply("DIRECT_LIMIT_BYTES", &mut config.delivery.direct_limit)?;
        source.apply("RELAY_LIMIT_BYTES", &mut config.delivery.relay_limit)?;
        source.apply("CHUNK_SIZE_BYTES", &mut config.delivery.chunk_size)?;

        if let Some(secs) = source.parse::<u64>("POLL_INTERVAL_SECS")? {
            config.monitor.poll_interval = Duration::from_secs(secs);
        }
        source.apply(
            "OBSERVATION_CAPACITY",
            &mut config.monitor.observation_capacity,
        )?;

        if let Some(secs) = source.parse::<u64>("THROTTLE_INTERVAL_SECS")? {
            config.throttle.min_interval = Duration::from_secs(secs);
        }
        source.apply("THROTTLE_STEP_PERCENT", &mut config.throttle.min_step)?;

        if let Some(storage_chat_id) = source.parse::<i64>("RELAY_STORAGE_CHAT_ID")? {
            let cache_path = source
                .raw("RELAY_CACHE_PATH")
                .map_or_else(|| PathBuf::from("data/relay_cache.db"), PathBuf::from);
            let days = source.parse::<u64>("RELAY_CACHE_MAX_AGE_DAYS")?.unwrap_or(30);
            config.relay = Some(RelaySettings {
                storage_chat_id,
                cache_path,
                cache_max_age: Duration::from_secs(days.saturating_mul(SECS_PER_DAY)),
            });
        }

        if let Some(root) = source.raw("STAGING_DIR") {
            config.staging.root = PathBuf::from(root);
        }
        source.apply("MAX_DISK_USAGE_BYTES", &mut config.staging.max_disk_usage)?;
        if let Some(hours) = source.parse::<u64>("STAGING_STALE_HOURS")? {
            config.staging.stale_after = Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR));
        }
        if let Some(hours) = source.parse::<u64>("JANITOR_INTERVAL_HOURS")? {
            config.staging.janitor_interval =
                Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR));
        }

        if let Some(url) = source.raw("QBT_URL") {
            config.engine.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(username) = source.raw("QBT_USERNAME") {
            config.engine.username = username;
        }
        if let Some(password) = source.raw("QBT_PASSWORD") {
            config.engine.password = password;
        }
        if let Some(save_path) = source.raw("QBT_SAVE_PATH") {
            config.engine.save_path = PathBuf::from(save_path);
        }

        if let Some(level) = source.raw("LOG_LEVEL") {
            config.logging.level = level;
        }
        config.logging.format = source.raw("LOG_FORMAT");

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        let limits = &self.delivery;
        if limits.direct_limit == 0 {
            return Err(invalid("direct_limit", limits.direct_limit, "zero"));
        }
        if limits.chunk_size == 0 {
            return Err(invalid("chunk_size", limits.chunk_size, "zero"));
        }
        // Parts travel over the primary channel, so a worst-case part must fit.
        if DeliveryLimits::part_size_bound(limits.chunk_size) > limits.direct_limit {
            return Err(invalid(
                "chunk_size",
                limits.chunk_size,
                "part_exceeds_direct_limit",
            ));
        }
        if limits.relay_limit <= limits.direct_limit {
            return Err(invalid(
                "relay_limit",
                limits.relay_limit,
                "not_above_direct_limit",
            ));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(invalid("poll_interval", 0, "zero"));
        }
        if self.monitor.observation_capacity == 0 {
            return Err(invalid("observation_capacity", 0, "zero"));
        }
        let step = self.throttle.min_step;
        if !(step > 0.0 && step <= 100.0) {
            return Err(invalid("throttle_step", step, "out_of_range"));
        }
        if self.staging.max_disk_usage == 0 {
            return Err(invalid("max_disk_usage", 0, "zero"));
        }
        if self.engine.base_url.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "engine_url",
                value: None,
                reason: "empty",
            });
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        value: Some(value.to_string()),
        reason,
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> ConfigResult<Option<T>> {
        let Some(value) = self.raw(name) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Unparseable {
                key: Self::key(name),
                value,
                expected: std::any::type_name::<T>(),
            })
    }

    fn apply<T: FromStr>(&self, name: &str, slot: &mut T) -> ConfigResult<()> {
        if let Some(value) = self.parse(name)? {
            *slot = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> ConfigResult<TorrelayConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (format!("{ENV_PREFIX}{key}"), (*value).to_string()))
            .collect();
        TorrelayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = load(&[]).expect("defaults are valid");
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(5));
        assert!(config.relay.is_none());
        assert!(config.logging.format.is_none());
    }

    #[test]
    fn relay_is_enabled_by_storage_chat() {
        let config = load(&[
            ("RELAY_STORAGE_CHAT_ID", "-1001234"),
            ("RELAY_CACHE_MAX_AGE_DAYS", "7"),
        ])
        .expect("relay config is valid");
        let relay = config.relay.expect("relay configured");
        assert_eq!(relay.storage_chat_id, -1_001_234);
        assert_eq!(relay.cache_max_age, Duration::from_secs(7 * SECS_PER_DAY));
        assert_eq!(relay.cache_path, PathBuf::from("data/relay_cache.db"));
    }

    #[test]
    fn unparseable_values_name_the_key() {
        let err = load(&[("POLL_INTERVAL_SECS", "soon")]).expect_err("should fail");
        match err {
            ConfigError::Unparseable { key, value, .. } => {
                assert_eq!(key, "TORRELAY_POLL_INTERVAL_SECS");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn chunk_size_must_fit_direct_limit() {
        let err = load(&[("DIRECT_LIMIT_BYTES", "1000"), ("CHUNK_SIZE_BYTES", "1000")])
            .expect_err("chunk equal to direct limit is rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "chunk_size",
                reason: "part_exceeds_direct_limit",
                ..
            }
        ));
    }

    #[test]
    fn chunk_size_needs_headroom_for_incompressible_parts() {
        let err = load(&[
            ("DIRECT_LIMIT_BYTES", "1000000"),
            ("CHUNK_SIZE_BYTES", "999999"),
        ])
        .expect_err("no room for gzip overhead");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "chunk_size",
                reason: "part_exceeds_direct_limit",
                ..
            }
        ));

        let config = load(&[
            ("DIRECT_LIMIT_BYTES", "1000000"),
            ("CHUNK_SIZE_BYTES", "995000"),
        ])
        .expect("worst-case part fits");
        assert_eq!(config.delivery.chunk_size, 995_000);
    }

    #[test]
    fn relay_limit_must_exceed_direct_limit() {
        let err = load(&[
            ("DIRECT_LIMIT_BYTES", "2000"),
            ("CHUNK_SIZE_BYTES", "1900"),
            ("RELAY_LIMIT_BYTES", "2000"),
        ])
        .expect_err("relay limit equal to direct limit is rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "relay_limit",
                ..
            }
        ));
    }

    #[test]
    fn throttle_step_is_bounded() {
        assert!(load(&[("THROTTLE_STEP_PERCENT", "0")]).is_err());
        assert!(load(&[("THROTTLE_STEP_PERCENT", "120")]).is_err());
        assert!(load(&[("THROTTLE_STEP_PERCENT", "2.5")]).is_ok());
    }

    #[test]
    fn engine_url_is_normalised() {
        let config = load(&[("QBT_URL", "http://seedbox:8080/")]).expect("valid url");
        assert_eq!(config.engine.base_url, "http://seedbox:8080");
    }
}
