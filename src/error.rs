//! Error types surfaced by the revalidation engine.

use serde::{Deserialize, Serialize};

/// Errors produced while resolving or revalidating a key.
///
/// The type is `Clone` so a single failure can be handed to every waiter of a
/// deduplicated fetch, and `Serialize` so the most recent failure can be kept
/// in the cache next to the last good value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwrError {
  /// The fetcher failed.
  #[error("fetch failed for `{key}`: {message}")]
  Fetch { key: String, message: String },

  /// A cached value could not be converted to or from the requested type.
  #[error("cache codec error for `{key}`: {message}")]
  Codec { key: String, message: String },

  /// The consumer that requested the revalidation no longer exists.
  #[error("consumer for `{key}` was dropped")]
  Detached { key: String },

  /// A spawned revalidation task did not run to completion.
  #[error("revalidation task for `{key}` failed: {message}")]
  Task { key: String, message: String },
}

impl SwrError {
  pub(crate) fn fetch(key: &str, report: &color_eyre::Report) -> Self {
    Self::Fetch {
      key: key.to_string(),
      message: format!("{:#}", report),
    }
  }

  pub(crate) fn codec(key: &str, err: impl std::fmt::Display) -> Self {
    Self::Codec {
      key: key.to_string(),
      message: err.to_string(),
    }
  }

  pub(crate) fn detached(key: &str) -> Self {
    Self::Detached {
      key: key.to_string(),
    }
  }

  /// The cache key this error belongs to.
  pub fn key(&self) -> &str {
    match self {
      Self::Fetch { key, .. }
      | Self::Codec { key, .. }
      | Self::Detached { key }
      | Self::Task { key, .. } => key,
    }
  }

  pub fn is_detached(&self) -> bool {
    matches!(self, Self::Detached { .. })
  }
}

pub type Result<T, E = SwrError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  #[test]
  fn test_fetch_error_keeps_cause_chain() {
    let report = eyre!("connection reset").wrap_err("GET /items failed");
    let err = SwrError::fetch("/items", &report);

    assert_eq!(err.key(), "/items");
    assert_eq!(
      err.to_string(),
      "fetch failed for `/items`: GET /items failed: connection reset"
    );
  }

  #[test]
  fn test_error_survives_json_round_trip() {
    let err = SwrError::codec("len@a", "invalid type: string, expected usize");
    let value = serde_json::to_value(&err).unwrap();

    assert_eq!(value["kind"], "codec");
    assert_eq!(serde_json::from_value::<SwrError>(value).unwrap(), err);
  }
}
