//! Histogram metrics

use super::labels;
use metrics::histogram;

/// Duration of a successful Retry-Open, backoff included
pub fn open_duration(ms: u64) {
    histogram!(labels::OPEN_DURATION_MS).record(ms as f64);
}

/// Attempts a successful Retry-Open needed
pub fn open_attempts(attempts: u32) {
    histogram!(labels::OPEN_ATTEMPTS).record(attempts as f64);
}

/// Duration of a successful authentication exchange
pub fn auth_duration(plugin: &'static str, ms: u64) {
    histogram!(labels::AUTH_DURATION_MS, "plugin" => plugin).record(ms as f64);
}
