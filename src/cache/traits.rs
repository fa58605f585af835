//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::SwrError;

/// Values that can live in the cache.
///
/// Entries are stored in their JSON form, so any owned serde type works.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Change listener, called with the key that was written or deleted.
pub type Listener = std::sync::Arc<dyn Fn(&str) + Send + Sync>;

/// Key/value store shared by every consumer of the same keys.
///
/// `get` right after `set` on the same key must return the value just set.
/// Concurrent writers to one key are resolved by last write wins.
pub trait CacheProvider: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;

  fn set(&self, key: &str, value: Value);

  fn delete(&self, key: &str);

  fn keys(&self) -> Vec<String>;

  fn clear(&self);

  /// Register a change listener. Dropping the returned guard unsubscribes.
  fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Guard for a cache subscription.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
    Self {
      unsubscribe: Some(Box::new(unsubscribe)),
    }
  }

  pub fn unsubscribe(mut self) {
    if let Some(f) = self.unsubscribe.take() {
      f();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(f) = self.unsubscribe.take() {
      f();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.unsubscribe.is_some())
      .finish()
  }
}

/// Result of a read, including the latest error and where the data came from.
///
/// Data and error are independent: stale data can be served next to the error
/// of the revalidation that failed to refresh it.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data, if any has been produced yet
  pub data: Option<T>,
  /// Most recent error for this key
  pub error: Option<SwrError>,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Data produced by a fetch the caller waited for.
  pub fn from_network(data: T) -> Self {
    Self {
      data: Some(data),
      error: None,
      source: CacheSource::Network,
    }
  }

  /// Data served from the cache while a revalidation runs in the background.
  pub fn from_cache(data: T, error: Option<SwrError>) -> Self {
    Self {
      data: Some(data),
      error,
      source: CacheSource::Cache,
    }
  }

  /// Nothing cached yet; a load has been started in the background.
  pub fn pending(error: Option<SwrError>) -> Self {
    Self {
      data: None,
      error,
      source: CacheSource::Pending,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the fetcher
  Network,
  /// Cached data, possibly stale, revalidation in progress
  Cache,
  /// No data yet, loading in the background
  Pending,
}
