//! Readiness polling
//!
//! Right after launch or hot reload the widget inspector answers with a
//! "Null check operator" error until the first frame exists. [`wait_for_ready`]
//! retries a probe through that window and nothing else.

use std::future::Future;
use std::time::Duration;

use fdump_core::prelude::*;

/// Error text the inspector reports while the widget tree is not built yet.
pub const TRANSIENT_NOT_READY_SIGNATURE: &str = "Null check operator used on a null value";

/// Whether `message` is the known "tree not ready yet" failure.
pub fn is_transient_not_ready_error(message: &str) -> bool {
    message.contains(TRANSIENT_NOT_READY_SIGNATURE)
}

/// Call `probe` until it succeeds, retrying only transient not-ready errors.
///
/// At most `max_attempts` calls are made (a budget of 0 still makes one),
/// sleeping `interval` between them. Any other error is returned at once.
///
/// # Errors
///
/// [`Error::StabilizationTimeout`] when every attempt failed transiently.
pub async fn wait_for_ready<T, F, Fut>(
    mut probe: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        debug!("Readiness probe attempt {}/{}", attempt, max_attempts);
        match probe().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Target ready after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) if is_transient_not_ready_error(&e.to_string()) => {
                info!(
                    "Widget tree not ready yet (attempt {}/{}), retrying in {:?}",
                    attempt, max_attempts, interval
                );
                if attempt < max_attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(e) => {
                warn!("Readiness probe failed: {}", e);
                return Err(e);
            }
        }
    }

    Err(Error::StabilizationTimeout {
        attempts: max_attempts,
    })
}
