//! Metrics for connection opening, authentication and registry activity
//!
//! Recorded through the `metrics` facade; nothing is emitted unless the
//! embedding application installs a recorder.

pub mod counters;
pub mod histograms;
pub mod labels;
