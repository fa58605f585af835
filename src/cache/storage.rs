//! In-memory cache provider.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{CacheProvider, Listener, Subscription};

type Listeners = Arc<Mutex<Vec<(u64, Listener)>>>;

/// Unbounded in-memory cache backed by a `HashMap`.
///
/// Listeners are notified synchronously after the write is visible and
/// without any internal lock held, so they may read the cache.
#[derive(Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, Value>>,
  listeners: Listeners,
  next_listener: AtomicU64,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn notify(&self, key: &str) {
    // Snapshot so listeners run without the lock held
    let listeners: Vec<Listener> = self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(_, l)| Arc::clone(l))
      .collect();

    for listener in listeners {
      listener(key);
    }
  }
}

impl CacheProvider for MemoryCache {
  fn get(&self, key: &str) -> Option<Value> {
    self.entries().get(key).cloned()
  }

  fn set(&self, key: &str, value: Value) {
    self.entries().insert(key.to_string(), value);
    self.notify(key);
  }

  fn delete(&self, key: &str) {
    let removed = self.entries().remove(key).is_some();
    if removed {
      self.notify(key);
    }
  }

  fn keys(&self) -> Vec<String> {
    self.entries().keys().cloned().collect()
  }

  fn clear(&self) {
    let keys: Vec<String> = self.entries().drain().map(|(k, _)| k).collect();
    for key in keys {
      self.notify(&key);
    }
  }

  fn subscribe(&self, listener: Listener) -> Subscription {
    let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push((id, listener));

    let listeners = Arc::downgrade(&self.listeners);
    Subscription::new(move || {
      if let Some(listeners) = listeners.upgrade() {
        listeners
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .retain(|(other, _)| *other != id);
      }
    })
  }
}

impl std::fmt::Debug for MemoryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryCache")
      .field("entries", &self.entries().len())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_get_after_set() {
    let cache = MemoryCache::new();
    assert_eq!(cache.get("a"), None);

    cache.set("a", json!("A"));
    assert_eq!(cache.get("a"), Some(json!("A")));

    // last write wins
    cache.set("a", json!("B"));
    assert_eq!(cache.get("a"), Some(json!("B")));

    cache.delete("a");
    assert_eq!(cache.get("a"), None);
  }

  #[test]
  fn test_listeners_see_written_value() {
    let cache = Arc::new(MemoryCache::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sub = {
      let reader = Arc::clone(&cache);
      let seen = Arc::clone(&seen);
      cache.subscribe(Arc::new(move |key: &str| {
        seen.lock().unwrap().push((key.to_string(), reader.get(key)));
      }))
    };

    cache.set("a", json!(1));
    cache.delete("a");
    // deleting a missing key is silent
    cache.delete("a");

    assert_eq!(
      *seen.lock().unwrap(),
      vec![("a".to_string(), Some(json!(1))), ("a".to_string(), None)]
    );

    sub.unsubscribe();
    cache.set("b", json!(2));
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[test]
  fn test_dropping_subscription_unsubscribes() {
    let cache = MemoryCache::new();
    let hits = Arc::new(AtomicU64::new(0));

    {
      let hits = Arc::clone(&hits);
      let _sub = cache.subscribe(Arc::new(move |_: &str| {
        hits.fetch_add(1, Ordering::SeqCst);
      }));
      cache.set("a", json!(1));
    }
    cache.set("a", json!(2));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_clear_and_keys() {
    let cache = MemoryCache::new();
    cache.set("a", json!(1));
    cache.set("b", json!(2));

    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);

    cache.clear();
    assert!(cache.keys().is_empty());
  }
}
