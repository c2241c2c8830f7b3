//! Registry configuration

use super::retry::RetryPolicy;
use crate::dsn::{DsnBuilder, DEFAULT_PORT, DEFAULT_TIME_ZONE};
use serde::Deserialize;

/// Default number of open attempts per `add`
pub const DEFAULT_RETRY_COUNT: u32 = 120;

/// Connection registry configuration
///
/// Can be built in code or deserialized; durations are written the way
/// `humantime` prints them (`500ms`, `1m 30s`).
///
/// ```
/// use mysqltest_conn::RegistryConfig;
///
/// let config = RegistryConfig::builder()
///     .default_port(3306)
///     .retry_count(3)
///     .build();
/// assert_eq!(config.default_port, 3306);
/// assert!(config.allow_all_files);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Port used in every built DSN
    pub default_port: u16,
    /// Extra DSN parameters appended verbatim
    pub default_params: String,
    /// Session time zone
    pub time_zone: String,
    /// `allowAllFiles` DSN flag
    pub allow_all_files: bool,
    /// Attempt budget for opens without expected errors
    pub retry_count: u32,
    /// Backoff and deadline
    pub retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            default_params: String::new(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            allow_all_files: true,
            retry_count: DEFAULT_RETRY_COUNT,
            retry: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Configuration with the given port, extra parameters and attempt budget
    pub fn new(default_port: u16, default_params: impl Into<String>, retry_count: u32) -> Self {
        Self {
            default_port,
            default_params: default_params.into(),
            retry_count,
            ..Self::default()
        }
    }

    /// Create a builder starting from the defaults
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder {
            config: Self::default(),
        }
    }

    /// DSN builder carrying this configuration's defaults
    pub fn dsn_builder(&self) -> DsnBuilder {
        DsnBuilder::new(self.default_port)
            .time_zone(self.time_zone.clone())
            .allow_all_files(self.allow_all_files)
            .extra_params(self.default_params.clone())
    }
}

/// Builder for `RegistryConfig`
#[derive(Debug, Clone)]
pub struct RegistryConfigBuilder {
    config: RegistryConfig,
}

impl RegistryConfigBuilder {
    /// Set the DSN port
    pub fn default_port(mut self, port: u16) -> Self {
        self.config.default_port = port;
        self
    }

    /// Set extra DSN parameters (`&` is prepended when missing)
    pub fn default_params(mut self, params: impl Into<String>) -> Self {
        self.config.default_params = params.into();
        self
    }

    /// Set the session time zone
    pub fn time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.config.time_zone = time_zone.into();
        self
    }

    /// Set the `allowAllFiles` flag
    pub fn allow_all_files(mut self, allow: bool) -> Self {
        self.config.allow_all_files = allow;
        self
    }

    /// Set the attempt budget
    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    /// Set backoff and deadline
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RegistryConfig {
        self.config
    }
}

/// `humantime` (de)serialization for durations
pub(crate) mod duration_serde {
    use serde::{de::Error as _, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => humantime::parse_duration(&text)
                    .map(Some)
                    .map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.default_port, 4000);
        assert_eq!(config.time_zone, "Asia/Shanghai");
        assert!(config.allow_all_files);
        assert_eq!(config.retry_count, 120);
        assert_eq!(config.retry.backoff, Duration::from_millis(500));
        assert_eq!(config.retry.deadline, None);
    }

    #[test]
    fn test_new_keeps_other_defaults() {
        let config = RegistryConfig::new(3306, "&sql_mode=''", 5);
        assert_eq!(config.default_port, 3306);
        assert_eq!(config.default_params, "&sql_mode=''");
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.time_zone, DEFAULT_TIME_ZONE);
    }

    #[test]
    fn test_dsn_builder_uses_config() {
        let config = RegistryConfig::builder()
            .default_port(4001)
            .time_zone("UTC")
            .allow_all_files(false)
            .default_params("foo=bar")
            .build();
        assert_eq!(
            config.dsn_builder().build("u", "p", "h", "d"),
            "u:p@tcp(h:4001)/d?time_zone=%27UTC%27&allowAllFiles=false&foo=bar"
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RegistryConfig = serde_json::from_str(
            r#"{"default_port": 3306, "retry": {"backoff": "50ms", "deadline": "1m"}}"#,
        )
        .unwrap();
        assert_eq!(config.default_port, 3306);
        assert_eq!(config.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(config.retry.backoff, Duration::from_millis(50));
        assert_eq!(config.retry.deadline, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_deserialize_rejects_bad_duration() {
        let result: Result<RegistryConfig, _> =
            serde_json::from_str(r#"{"retry": {"backoff": "soon"}}"#);
        assert!(result.is_err());
    }
}
