//! Typed access to a cache provider.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::traits::{CacheProvider, Listener, Subscription};
use crate::error::{Result, SwrError};

/// Shared handle to a cache provider with serde conversions on top.
///
/// Components hold a `Store` and string keys, never references into stored
/// values, so every read goes through the provider.
#[derive(Clone)]
pub struct Store {
  provider: Arc<dyn CacheProvider>,
}

impl Store {
  pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
    Self { provider }
  }

  pub fn provider(&self) -> &Arc<dyn CacheProvider> {
    &self.provider
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.provider.get(key)
  }

  pub fn set(&self, key: &str, value: Value) {
    self.provider.set(key, value)
  }

  pub fn delete(&self, key: &str) {
    self.provider.delete(key)
  }

  pub fn subscribe(&self, listener: Listener) -> Subscription {
    self.provider.subscribe(listener)
  }

  /// Read and decode the value under `key`.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.provider.get(key) {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| SwrError::codec(key, e)),
      None => Ok(None),
    }
  }

  /// Encode and write `value` under `key`.
  pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value).map_err(|e| SwrError::codec(key, e))?;
    self.provider.set(key, value);
    Ok(())
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store").finish_non_exhaustive()
  }
}
