//! Open-and-probe with bounded retry

use super::config::duration_serde;
use crate::driver::{Db, Driver};
use crate::dsn::Target;
use crate::metrics::labels;
use crate::{Error, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default pause between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

const TROUBLESHOOTING_HINT: &str = "check that the database server is running, \
    that the network path to it is open (firewall included), \
    and that the user name and password are correct";

/// Backoff between attempts and optional overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Constant pause after each failed attempt
    #[serde(deserialize_with = "duration_serde::deserialize")]
    pub backoff: Duration,
    /// Give up once this much time has passed since the first attempt
    #[serde(deserialize_with = "duration_serde::option::deserialize")]
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given backoff and no deadline
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            deadline: None,
        }
    }

    /// Stop retrying after `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Successfully opened and probed database handle
#[derive(Debug)]
pub struct Opened<Db> {
    /// The handle
    pub db: Db,
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Time since the first attempt
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Probe,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Open => labels::PHASE_OPEN,
            Phase::Probe => labels::PHASE_PROBE,
        }
    }
}

enum Interrupt {
    Cancelled,
    Deadline,
}

async fn interruptible<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> std::result::Result<F::Output, Interrupt> {
    let expiry = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = expiry => Err(Interrupt::Deadline),
        out = fut => Ok(out),
    }
}

async fn attempt<D: Driver>(driver: &D, dsn: &str) -> std::result::Result<D::Db, (Phase, Error)> {
    let db = driver.open(dsn).await.map_err(|e| (Phase::Open, e))?;

    if let Err(e) = db.ping().await {
        if let Err(close_err) = db.close().await {
            crate::metrics::counters::close_failed(labels::CLOSE_PROBE_CLEANUP);
            tracing::warn!(error = %close_err, "failed to close database handle after failed probe");
        }
        return Err((Phase::Probe, e));
    }

    Ok(db)
}

fn past_deadline(last: Option<(Phase, Error)>, elapsed: Duration) -> (Phase, Error) {
    match last {
        Some((phase, cause)) => (
            phase,
            Error::DeadlineExceeded {
                elapsed,
                last: Some(Box::new(cause)),
            },
        ),
        None => (Phase::Open, Error::DeadlineExceeded { elapsed, last: None }),
    }
}

/// Open a database handle and verify it with a liveness probe.
///
/// Makes at most `max_attempts` attempts (0 is treated as 1), sleeping
/// `policy.backoff` after every failed attempt except the last. A handle whose
/// probe fails is closed before the next attempt.
///
/// # Errors
///
/// * `Error::Cancelled` as soon as `cancel` fires, never retried
/// * `Error::OpenFailed` / `Error::ProbeFailed` when the budget or the deadline
///   runs out, named after the phase of the last failure and wrapping its
///   error (inside `Error::DeadlineExceeded` when the deadline cut the run
///   short). Attempts that never started are not counted.
pub async fn open_with_retry<D: Driver>(
    driver: &D,
    dsn: &str,
    max_attempts: u32,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Opened<D::Db>> {
    let max_attempts = max_attempts.max(1);
    let start = Instant::now();
    let deadline = policy.deadline.map(|limit| start + limit);
    let target = Target::from_dsn(dsn);

    let mut last: Option<(Phase, Error)> = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            last = Some(past_deadline(last.take(), start.elapsed()));
            break;
        }
        attempts += 1;
        let remaining = max_attempts - attempts;

        match interruptible(attempt(driver, dsn), cancel, deadline).await {
            Err(Interrupt::Cancelled) => {
                tracing::info!(%target, attempt = attempts, "open cancelled");
                return Err(Error::Cancelled);
            }
            Err(Interrupt::Deadline) => {
                last = Some(past_deadline(last.take(), start.elapsed()));
                break;
            }
            Ok(Ok(db)) => {
                let elapsed = start.elapsed();
                crate::metrics::counters::open_attempt(labels::PHASE_PROBE, labels::OUTCOME_SUCCESS);
                crate::metrics::histograms::open_duration(elapsed.as_millis() as u64);
                crate::metrics::histograms::open_attempts(attempts);
                tracing::debug!(%target, attempts, ?elapsed, "database handle opened");
                return Ok(Opened {
                    db,
                    attempts,
                    elapsed,
                });
            }
            Ok(Err((phase, e))) => {
                crate::metrics::counters::open_attempt(phase.label(), labels::OUTCOME_FAILURE);
                tracing::warn!(
                    %target,
                    phase = phase.label(),
                    attempt = attempts,
                    remaining,
                    error = %e,
                    "attempt to open database failed"
                );
                last = Some((phase, e));
            }
        }

        if remaining == 0 {
            break;
        }

        match interruptible(tokio::time::sleep(policy.backoff), cancel, deadline).await {
            Ok(()) => {}
            Err(Interrupt::Cancelled) => {
                tracing::info!(%target, attempt = attempts, "open cancelled during backoff");
                return Err(Error::Cancelled);
            }
            Err(Interrupt::Deadline) => {
                last = Some(past_deadline(last.take(), start.elapsed()));
                break;
            }
        }
    }

    let elapsed = start.elapsed();
    let (phase, source) = last.unwrap_or_else(|| past_deadline(None, elapsed));

    tracing::error!(
        host = %target.host,
        port = %target.port,
        database = %target.database,
        ?elapsed,
        attempts,
        phase = phase.label(),
        error = %source,
        hint = TROUBLESHOOTING_HINT,
        "failed to open database"
    );

    let source = Box::new(source);
    Err(match phase {
        Phase::Open => Error::OpenFailed {
            target,
            attempts,
            elapsed,
            source,
        },
        Phase::Probe => Error::ProbeFailed {
            target,
            attempts,
            elapsed,
            source,
        },
    })
}
