//! Revalidation: fetch deduplication, retry backoff and external triggers.

pub mod retry;
mod scheduler;

pub use retry::{backoff_delay, on_error_retry, Revalidate, RetryState};
pub use scheduler::{Registration, RevalidateFn, Swr};

/// Why a registered consumer is asked to revalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidateEvent {
  /// The consuming surface regained focus
  Focus,
  /// Connectivity was restored
  Reconnect,
  /// The key was mutated
  Mutate,
}
