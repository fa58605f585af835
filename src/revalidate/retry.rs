//! Error retry policy with randomized exponential backoff.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::SwrError;

/// Retry bookkeeping threaded through one chain of attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
  pub retry_count: u32,
}

/// Starts another attempt for the key that failed.
pub type Revalidate = Arc<dyn Fn(RetryState) + Send + Sync>;

/// Largest exponent applied to the retry interval.
const MAX_BACKOFF_EXPONENT: u32 = 8;

/// Default `on_error_retry` hook.
///
/// Does nothing while the consumer is hidden (focus brings a revalidation
/// anyway) or once `retry_count` exceeds `error_retry_count`. Otherwise the
/// next attempt is scheduled after a randomized exponential delay.
pub fn on_error_retry(
  _err: &SwrError,
  key: &str,
  config: &Config,
  revalidate: Revalidate,
  opts: RetryState,
) {
  if !config.environment.is_visible() {
    debug!(key, "not visible, skipping retry");
    return;
  }

  if let Some(max) = config.options.error_retry_count {
    if opts.retry_count > max {
      debug!(key, retry_count = opts.retry_count, max, "retry budget exhausted");
      return;
    }
  }

  let timeout = backoff_delay(
    opts.retry_count,
    config.options.error_retry_interval,
    rand::random::<f64>(),
  );
  debug!(key, retry_count = opts.retry_count, ?timeout, "scheduling retry");

  tokio::spawn(async move {
    tokio::time::sleep(timeout).await;
    revalidate(opts);
  });
}

/// Delay before retry number `retry_count`, for `jitter` in `[0, 1)`:
/// `floor((jitter + 0.5) * 2^min(retry_count, 8)) * interval`.
pub fn backoff_delay(retry_count: u32, interval: Duration, jitter: f64) -> Duration {
  let count = retry_count.min(MAX_BACKOFF_EXPONENT);
  let factor = ((jitter + 0.5) * f64::from(1u32 << count)).floor() as u32;
  interval.saturating_mul(factor)
}
