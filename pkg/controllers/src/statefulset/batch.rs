//! Slow-start execution of independent per-ordinal operations.

use futures_util::future::join_all;
use pkg_constants::controller::MAX_BATCH_SIZE;
use std::future::Future;
use tracing::debug;

use super::errors::{AggregateError, BatchError};

/// Run `f(0..remaining)` in batches that start at `initial_batch_size` and
/// double after every fully successful batch, capped at `MAX_BATCH_SIZE`.
///
/// Items inside a batch run concurrently; batches run one after another.
/// The first batch with a failure stops the run and its errors are returned
/// together. Cancellation is left to the caller dropping the future.
pub async fn slow_start_batch<F, Fut>(
    initial_batch_size: usize,
    remaining: usize,
    f: F,
) -> Result<usize, BatchError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut remaining = remaining;
    let mut successes = 0;
    let mut next = 0;
    let mut batch_size = remaining.min(initial_batch_size);
    while batch_size > 0 {
        debug!("slow start: batch of {} starting at item {}", batch_size, next);
        let results = join_all((next..next + batch_size).map(&f)).await;
        next += batch_size;

        let errors: Vec<anyhow::Error> = results.into_iter().filter_map(Result::err).collect();
        if !errors.is_empty() {
            return Err(BatchError {
                successes,
                source: AggregateError::new(errors),
            });
        }
        successes += batch_size;
        remaining -= batch_size;
        batch_size = next_batch_size(batch_size, remaining);
    }
    Ok(successes)
}

fn next_batch_size(current: usize, remaining: usize) -> usize {
    current.saturating_mul(2).min(remaining).min(MAX_BATCH_SIZE)
}

/// Apply `f` to every index. Ordered mode walks indexes ascending and stops at
/// the first one that asks to exit; burst mode hands everything to
/// `slow_start_batch` and ignores the exit signal.
///
/// Returns `Ok(true)` when the caller should stop this pass.
pub async fn run_for_all<F, Fut>(count: usize, f: F, monotonic: bool) -> anyhow::Result<bool>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    if monotonic {
        for i in 0..count {
            if f(i).await? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    slow_start_batch(1, count, |i| {
        let fut = f(i);
        async move { fut.await.map(|_| ()) }
    })
    .await
    .map_err(|e| anyhow::Error::new(e.source))?;
    Ok(false)
}
