//! Counter metrics

use super::labels;
use metrics::counter;

/// One open or probe attempt finished
pub fn open_attempt(phase: &'static str, outcome: &'static str) {
    counter!(labels::OPEN_ATTEMPTS_TOTAL, "phase" => phase, "outcome" => outcome).increment(1);
}

/// A new handle shared the current handle's database
pub fn handle_reused() {
    counter!(labels::HANDLE_REUSED_TOTAL).increment(1);
}

/// A handle was removed by name
pub fn disconnected() {
    counter!(labels::DISCONNECTS_TOTAL).increment(1);
}

/// Closing a session or database failed
pub fn close_failed(context: &'static str) {
    counter!(labels::CLOSE_FAILURES_TOTAL, "context" => context).increment(1);
}

/// Authentication started with `plugin`
pub fn auth_attempted(plugin: &'static str) {
    counter!(labels::AUTH_ATTEMPTS_TOTAL, "plugin" => plugin).increment(1);
}

/// Authentication with `plugin` failed
pub fn auth_failed(plugin: &'static str, reason: &'static str) {
    counter!(labels::AUTH_FAILURES_TOTAL, "plugin" => plugin, "reason" => reason).increment(1);
}
