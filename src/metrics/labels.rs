//! Metric names and label values

/// Open attempts by phase and outcome
pub const OPEN_ATTEMPTS_TOTAL: &str = "mysqltest_conn_open_attempts_total";
/// Handles that shared the current database handle
pub const HANDLE_REUSED_TOTAL: &str = "mysqltest_conn_handle_reused_total";
/// Handles removed by disconnect
pub const DISCONNECTS_TOTAL: &str = "mysqltest_conn_disconnects_total";
/// Close failures (disconnect, close_all, probe cleanup)
pub const CLOSE_FAILURES_TOTAL: &str = "mysqltest_conn_close_failures_total";
/// Authentication attempts by plugin
pub const AUTH_ATTEMPTS_TOTAL: &str = "mysqltest_conn_auth_attempts_total";
/// Authentication failures by plugin and reason
pub const AUTH_FAILURES_TOTAL: &str = "mysqltest_conn_auth_failures_total";
/// Time from the first attempt to a probed database handle
pub const OPEN_DURATION_MS: &str = "mysqltest_conn_open_duration_ms";
/// Attempts needed for a successful open
pub const OPEN_ATTEMPTS: &str = "mysqltest_conn_open_attempts";
/// Authentication exchange duration
pub const AUTH_DURATION_MS: &str = "mysqltest_conn_auth_duration_ms";

/// Driver `open` phase
pub const PHASE_OPEN: &str = "open";
/// Liveness probe phase
pub const PHASE_PROBE: &str = "probe";

/// Attempt succeeded
pub const OUTCOME_SUCCESS: &str = "success";
/// Attempt failed
pub const OUTCOME_FAILURE: &str = "failure";

/// Close happened in `disconnect`
pub const CLOSE_DISCONNECT: &str = "disconnect";
/// Close happened in `close_all`
pub const CLOSE_ALL: &str = "close_all";
/// Close of a handle that failed its probe
pub const CLOSE_PROBE_CLEANUP: &str = "probe_cleanup";
/// Close of a handle replaced under the same name
pub const CLOSE_REPLACED: &str = "replaced";
