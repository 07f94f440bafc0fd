//! Bounded dispatch of transfer tasks
//!
//! Tasks are pulled from a [`TaskSource`] one at a time and each admitted task runs as its own
//! tokio task. A [`throttle::Gate`] keeps at most `concurrency` of them in flight. The first
//! failure is written into a single-slot cell; once it is set no further task is admitted, but
//! transfers already in flight are left to finish. Nothing is ever cancelled.

use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tracing::instrument;

use crate::enumerate::TaskSource;
use crate::task::{Outcome, TransferResult, TransferTask};

/// Counts of one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    /// tasks dispatched
    pub attempted: usize,
    /// failed transfers, plus one if the source itself failed
    pub failed: usize,
    pub first_error: Option<String>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn reap(
    tally: &mut Tally,
    first_error: &OnceLock<String>,
    joined: Result<bool, tokio::task::JoinError>,
) {
    match joined {
        Ok(true) => {}
        Ok(false) => tally.failed += 1,
        Err(error) => {
            tracing::error!("transfer task did not complete: {}", &error);
            let _ = first_error.set(format!("transfer task did not complete: {error}"));
            tally.failed += 1;
        }
    }
}

/// Runs every task produced by `source` through `unit` with at most `concurrency` in flight,
/// admitting at most `ops_throttle` tasks per second (0 = unlimited).
///
/// Returns only after every dispatched unit has finished.
#[instrument(skip(source, unit))]
pub async fn run<S, F, Fut>(
    source: &mut S,
    concurrency: NonZeroUsize,
    ops_throttle: usize,
    unit: F,
) -> Tally
where
    S: TaskSource + ?Sized,
    F: Fn(TransferTask) -> Fut,
    Fut: std::future::Future<Output = TransferResult> + Send + 'static,
{
    let gate = throttle::Gate::new(concurrency);
    let ops_throttle = throttle::OpsThrottle::new(ops_throttle);
    let first_error = Arc::new(OnceLock::<String>::new());
    let mut join_set = tokio::task::JoinSet::new();
    let mut tally = Tally::default();
    while first_error.get().is_none() {
        let task = match source.next_task().await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(error) => {
                tracing::error!("{:#}", &error);
                let _ = first_error.set(format!("{error:#}"));
                tally.failed += 1;
                break;
            }
        };
        ops_throttle.get_token().await;
        let permit = gate.admit().await;
        while let Some(joined) = join_set.try_join_next() {
            reap(&mut tally, &first_error, joined);
        }
        if first_error.get().is_some() {
            tracing::debug!(
                "not dispatching {:?}, a transfer already failed",
                &task.relative_path
            );
            break;
        }
        tally.attempted += 1;
        let transfer = unit(task);
        let first_error = first_error.clone();
        join_set.spawn(async move {
            // the slot is released only after the outcome is recorded
            let _permit = permit;
            match std::panic::AssertUnwindSafe(transfer).catch_unwind().await {
                Ok(result) => match &result.outcome {
                    Outcome::Success { .. } => true,
                    Outcome::Failure(error) => {
                        let _ = first_error.set(format!("{error:#}"));
                        false
                    }
                },
                Err(payload) => {
                    let message = format!("transfer panicked: {}", panic_message(&*payload));
                    tracing::error!("{}", &message);
                    let _ = first_error.set(message);
                    false
                }
            }
        });
    }
    while let Some(joined) = join_set.join_next().await {
        reap(&mut tally, &first_error, joined);
    }
    tally.first_error = first_error.get().cloned();
    tracing::debug!(
        "dispatched {} transfer(s), {} failure(s)",
        tally.attempted,
        tally.failed
    );
    tally
}
