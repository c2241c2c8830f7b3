//! DSN construction

/// Default server port (TiDB)
pub const DEFAULT_PORT: u16 = 4000;

/// Default session time zone
pub const DEFAULT_TIME_ZONE: &str = "Asia/Shanghai";

/// Builds driver connection strings from credentials and fixed defaults
///
/// Output format:
///
/// ```text
/// user:password@tcp(host:port)/database?time_zone=%27<tz>%27&allowAllFiles=<bool><extra>
/// ```
///
/// # Examples
///
/// ```
/// use mysqltest_conn::dsn::DsnBuilder;
///
/// let dsn = DsnBuilder::new(4000).extra_params("&foo=bar").build("u", "p", "h", "d");
/// assert_eq!(
///     dsn,
///     "u:p@tcp(h:4000)/d?time_zone=%27Asia/Shanghai%27&allowAllFiles=true&foo=bar"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsnBuilder {
    port: u16,
    time_zone: String,
    allow_all_files: bool,
    extra_params: String,
}

impl Default for DsnBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

impl DsnBuilder {
    /// Create a builder for the given port with default time zone and `allowAllFiles=true`
    pub fn new(port: u16) -> Self {
        Self {
            port,
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            allow_all_files: true,
            extra_params: String::new(),
        }
    }

    /// Set the session time zone
    pub fn time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    /// Set the `allowAllFiles` flag
    pub fn allow_all_files(mut self, allow: bool) -> Self {
        self.allow_all_files = allow;
        self
    }

    /// Set extra query parameters appended verbatim (a leading `&` is added if missing)
    pub fn extra_params(mut self, params: impl Into<String>) -> Self {
        let params = params.into();
        self.extra_params = if params.is_empty() || params.starts_with('&') {
            params
        } else {
            format!("&{}", params)
        };
        self
    }

    /// Configured port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Configured time zone
    pub fn time_zone_name(&self) -> &str {
        &self.time_zone
    }

    /// Build a DSN
    pub fn build(&self, user: &str, password: &str, host: &str, database: &str) -> String {
        format!(
            "{}:{}@tcp({}:{})/{}?time_zone=%27{}%27&allowAllFiles={}{}",
            user,
            password,
            host,
            self.port,
            database,
            self.time_zone,
            self.allow_all_files,
            self.extra_params
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_reference_dsn() {
        let dsn = DsnBuilder::new(4000)
            .time_zone("Asia/Shanghai")
            .allow_all_files(true)
            .extra_params("&foo=bar")
            .build("u", "p", "h", "d");
        assert_eq!(
            dsn,
            "u:p@tcp(h:4000)/d?time_zone=%27Asia/Shanghai%27&allowAllFiles=true&foo=bar"
        );
    }

    #[test]
    fn test_build_without_extra_params() {
        let dsn = DsnBuilder::new(3306)
            .time_zone("UTC")
            .allow_all_files(false)
            .build("root", "", "127.0.0.1", "test");
        assert_eq!(
            dsn,
            "root:@tcp(127.0.0.1:3306)/test?time_zone=%27UTC%27&allowAllFiles=false"
        );
    }

    #[test]
    fn test_extra_params_gets_leading_ampersand() {
        let a = DsnBuilder::new(4000).extra_params("foo=bar");
        let b = DsnBuilder::new(4000).extra_params("&foo=bar");
        assert_eq!(a.build("u", "p", "h", "d"), b.build("u", "p", "h", "d"));
    }

    #[test]
    fn test_defaults() {
        let builder = DsnBuilder::default();
        assert_eq!(builder.port(), DEFAULT_PORT);
        assert_eq!(builder.time_zone_name(), DEFAULT_TIME_ZONE);
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = DsnBuilder::new(4000);
        assert_eq!(
            builder.build("u", "p", "h", "d"),
            builder.build("u", "p", "h", "d")
        );
    }
}
