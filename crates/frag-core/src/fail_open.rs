//! Best-effort side work that must never fail a job
//!
//! Activity logging and sandbox reclamation go through here: errors are
//! logged at `warn` and turned into `None`.
//!
//! Never route model calls, tool steps or outcome persistence through these
//! helpers. The runner has to see those errors to retry them.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Pause before retry `n` (1-based)
const RETRY_STEP: Duration = Duration::from_millis(100);

/// Await `f`, downgrading an error to a warning
///
/// ```no_run
/// use frag_core::fail_open::fail_open;
/// use frag_core::Result;
///
/// async fn append_activity() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_logger", || append_activity()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    f().await
        .map_err(|e| warn!("{} failed, continuing: {}", operation_name, e))
        .ok()
}

/// [`fail_open`] with up to `max_attempts` tries and a linearly growing pause
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_attempts: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match f().await {
            Ok(value) => return Some(value),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(
                "{} gave up after {} attempt(s), continuing: {}",
                operation_name, attempt, err
            );
            return None;
        }

        warn!("{} attempt {} failed: {}", operation_name, attempt, err);
        tokio::time::sleep(RETRY_STEP * attempt as u32).await;
    }
}
