//! Revalidation scheduler: deduplicated fetches, error retention and retries.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::{Revalidate, RetryState};
use super::RevalidateEvent;
use crate::cache::{Cacheable, Store};
use crate::config::Config;
use crate::error::{Result, SwrError};
use crate::fetcher::{self, Fetcher};
use crate::key::{self, FetchArgs, Key};

type SharedResult = Shared<BoxFuture<'static, Result<Value>>>;

/// Callback run when a revalidation event reaches a registered consumer.
pub type RevalidateFn = Arc<dyn Fn(RevalidateEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Most recent fetch operation for a key.
struct InFlight {
  id: u64,
  started: Instant,
  result: SharedResult,
}

struct Inner {
  store: Store,
  config: Config,
  in_flight: Mutex<HashMap<String, InFlight>>,
  consumers: Mutex<HashMap<String, Vec<(u64, RevalidateFn)>>>,
  next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared revalidation engine.
///
/// Every consumer holding a clone of the same `Swr` shares one cache and one
/// set of in-flight fetches, which is what makes deduplication work across
/// independent call sites.
#[derive(Clone)]
pub struct Swr {
  inner: Arc<Inner>,
}

impl Default for Swr {
  fn default() -> Self {
    Self::new(Config::default())
  }
}

impl Swr {
  /// Create an engine on top of `config.cache`. The config also serves as the
  /// base for consumers created from this engine.
  pub fn new(config: Config) -> Self {
    Self {
      inner: Arc::new(Inner {
        store: Store::new(Arc::clone(&config.cache)),
        config,
        in_flight: Mutex::new(HashMap::new()),
        consumers: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
      }),
    }
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  pub fn store(&self) -> &Store {
    &self.inner.store
  }

  /// Produce the value for `key`.
  ///
  /// Returns `Ok(None)` without fetching when the key is not ready. A fetch
  /// for the same key started less than `deduping_interval` ago, running or
  /// finished, is reused instead of calling `fetcher` again.
  pub async fn resolve<T: Cacheable>(
    &self,
    key: &Key,
    fetcher: Fetcher<T>,
    config: &Config,
  ) -> Result<Option<T>> {
    let serialized = key::serialize(key);
    let (Some(identity), Some(args)) = (serialized.identity(), serialized.fetch_args()) else {
      tracing::trace!(?key, "key not ready, skipping fetch");
      return Ok(None);
    };

    let value = self
      .resolve_value(identity, args, fetcher::erase(fetcher), config)
      .await?;
    serde_json::from_value(value)
      .map(Some)
      .map_err(|e| SwrError::codec(identity, e))
  }

  pub(crate) async fn resolve_value(
    &self,
    key: &str,
    args: FetchArgs,
    fetcher: Fetcher<Value>,
    config: &Config,
  ) -> Result<Value> {
    let (shared, deduped) = {
      let mut in_flight = lock(&self.inner.in_flight);
      match in_flight.get(key) {
        Some(entry) if entry.started.elapsed() < config.options.deduping_interval => {
          debug!(key, "deduplicating fetch");
          (entry.result.clone(), true)
        }
        _ => {
          let result = launch(
            &self.inner,
            key.to_string(),
            args,
            fetcher,
            config.clone(),
            RetryState::default(),
          );
          track(
            &self.inner,
            &mut in_flight,
            key,
            result.clone(),
            config.options.deduping_interval,
          );
          (result, false)
        }
      }
    };

    let value = shared.await?;
    // The store may have been written or cleared since the shared fetch ended
    if deduped {
      self.inner.store.set(key, value.clone());
    }
    Ok(value)
  }

  /// Latest cached value for `key`.
  pub fn cached<T: Cacheable>(&self, key: &str) -> Result<Option<T>> {
    self.inner.store.get_as(key)
  }

  /// Latest error recorded for `key`, cleared by the next success.
  pub fn error(&self, key: &str) -> Option<SwrError> {
    match self.inner.store.get_as(&key::error_key(key)) {
      Ok(err) => err,
      Err(err) => {
        warn!(key, error = %err, "unreadable error record");
        None
      }
    }
  }

  /// Whether a fetch for `key` is currently running.
  pub fn is_validating(&self, key: &str) -> bool {
    lock(&self.inner.in_flight)
      .get(key)
      .is_some_and(|entry| entry.result.peek().is_none())
  }

  /// Replace and/or revalidate the value under `key`.
  ///
  /// A replacement is written right away and clears the key's error. With
  /// `revalidate`, the recorded fetch is forgotten so the next resolve
  /// bypasses dedup, every consumer registered for `key` is asked to
  /// revalidate and the first failure is returned. Without it, a replacement
  /// becomes the key's recorded result, so resolves inside the dedup window
  /// yield it instead of refetching. Yields the value cached afterwards.
  pub async fn mutate(
    &self,
    key: &str,
    data: Option<Value>,
    revalidate: bool,
  ) -> Result<Option<Value>> {
    debug!(key, replace = data.is_some(), revalidate, "mutate");

    if let Some(data) = &data {
      self.inner.store.set(key, data.clone());
      self.inner.store.delete(&key::error_key(key));
    }

    {
      let mut in_flight = lock(&self.inner.in_flight);
      match data {
        _ if revalidate => {
          in_flight.remove(key);
        }
        Some(data) => {
          let local = futures::future::ready(Ok::<_, SwrError>(data)).boxed().shared();
          track(
            &self.inner,
            &mut in_flight,
            key,
            local,
            self.inner.config.options.deduping_interval,
          );
        }
        None => {}
      }
    }

    if revalidate {
      self.notify(Some(key), RevalidateEvent::Mutate).await?;
    }

    Ok(self.inner.store.get(key))
  }

  /// Register a consumer to be revalidated by events for `key`.
  pub fn register(&self, key: &str, revalidate: RevalidateFn) -> Registration {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    lock(&self.inner.consumers)
      .entry(key.to_string())
      .or_default()
      .push((id, revalidate));

    Registration {
      inner: Arc::downgrade(&self.inner),
      key: key.to_string(),
      id,
    }
  }

  /// The consumer surface regained focus.
  pub async fn focus(&self) -> Result<()> {
    self.notify(None, RevalidateEvent::Focus).await
  }

  /// Connectivity came back.
  pub async fn reconnect(&self) -> Result<()> {
    self.notify(None, RevalidateEvent::Reconnect).await
  }

  /// Deliver `event` to the consumers of `key`, or to all consumers.
  async fn notify(&self, key: Option<&str>, event: RevalidateEvent) -> Result<()> {
    let targets: Vec<RevalidateFn> = {
      let consumers = lock(&self.inner.consumers);
      match key {
        Some(key) => consumers
          .get(key)
          .map(|list| list.iter().map(|(_, f)| Arc::clone(f)).collect())
          .unwrap_or_default(),
        None => consumers
          .values()
          .flat_map(|list| list.iter().map(|(_, f)| Arc::clone(f)))
          .collect(),
      }
    };

    let results = futures::future::join_all(targets.iter().map(|f| f(event))).await;
    results.into_iter().collect()
  }
}

impl std::fmt::Debug for Swr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Swr")
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

/// Keeps a consumer registered; dropping it unregisters.
#[must_use = "dropping a Registration unregisters the consumer"]
pub struct Registration {
  inner: Weak<Inner>,
  key: String,
  id: u64,
}

impl Registration {
  pub fn key(&self) -> &str {
    &self.key
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    let Some(inner) = self.inner.upgrade() else {
      return;
    };
    let mut consumers = lock(&inner.consumers);
    if let Some(list) = consumers.get_mut(&self.key) {
      list.retain(|(id, _)| *id != self.id);
      if list.is_empty() {
        consumers.remove(&self.key);
      }
    }
  }
}

impl std::fmt::Debug for Registration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registration")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}

/// Record `result` as the current fetch for `key`. The record is dropped once
/// the fetch has finished and `window` has passed since it started, unless a
/// newer record replaced it first.
fn track(
  inner: &Arc<Inner>,
  in_flight: &mut HashMap<String, InFlight>,
  key: &str,
  result: SharedResult,
  window: Duration,
) {
  let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
  let started = Instant::now();
  in_flight.insert(
    key.to_string(),
    InFlight {
      id,
      started,
      result: result.clone(),
    },
  );

  let owner = Arc::downgrade(inner);
  let key = key.to_string();
  tokio::spawn(async move {
    let _ = result.await;
    tokio::time::sleep_until(started + window).await;

    let Some(inner) = owner.upgrade() else {
      return;
    };
    let mut in_flight = lock(&inner.in_flight);
    if in_flight.get(&key).is_some_and(|entry| entry.id == id) {
      in_flight.remove(&key);
    }
  });
}

/// Start one attempt in the background and return its shared result.
///
/// The attempt runs to completion even if every waiter goes away.
fn launch(
  inner: &Arc<Inner>,
  key: String,
  args: FetchArgs,
  fetcher: Fetcher<Value>,
  config: Config,
  retry: RetryState,
) -> SharedResult {
  let result = attempt(
    Arc::downgrade(inner),
    inner.store.clone(),
    key,
    args,
    fetcher,
    config,
    retry,
  )
  .boxed()
  .shared();

  tokio::spawn(result.clone());
  result
}

async fn attempt(
  owner: Weak<Inner>,
  store: Store,
  key: String,
  args: FetchArgs,
  fetcher: Fetcher<Value>,
  config: Config,
  retry: RetryState,
) -> Result<Value> {
  debug!(key = %key, retry_count = retry.retry_count, "fetching");

  let fetch = AssertUnwindSafe(fetcher(args.clone())).catch_unwind().boxed();
  let outcome = match watch_loading(fetch, &key, &config).await {
    Ok(outcome) => outcome,
    Err(_) => {
      return Err(SwrError::Task {
        key,
        message: "fetcher panicked".to_string(),
      })
    }
  };

  match outcome {
    Ok(value) => {
      store.set(&key, value.clone());
      store.delete(&key::error_key(&key));
      (config.on_success)(&value, &key, &config);
      Ok(value)
    }
    Err(report) => {
      // Errors bubbling up from nested resolves keep their original form
      let err = match report.downcast_ref::<SwrError>() {
        Some(err) => err.clone(),
        None => SwrError::fetch(&key, &report),
      };
      if err.is_detached() {
        debug!(key = %key, "consumer dropped, abandoning revalidation");
        return Err(err);
      }

      warn!(key = %key, retry_count = retry.retry_count, error = %err, "fetch failed");
      if let Err(codec) = store.set_as(&key::error_key(&key), &err) {
        warn!(key = %key, error = %codec, "failed to record error");
      }
      (config.on_error)(&err, &key, &config);

      if config.options.should_retry_on_error {
        let next = RetryState {
          retry_count: retry.retry_count + 1,
        };
        let revalidate = retry_handle(owner, key.clone(), args, fetcher, config.clone());
        (config.on_error_retry)(&err, &key, &config, revalidate, next);
      }

      Err(err)
    }
  }
}

/// Await `fetch`, firing `on_loading_slow` once if it outlives `loading_timeout`.
async fn watch_loading<F>(mut fetch: F, key: &str, config: &Config) -> F::Output
where
  F: std::future::Future + Unpin,
{
  match tokio::time::timeout(config.options.loading_timeout, &mut fetch).await {
    Ok(output) => output,
    Err(_) => {
      warn!(key, timeout = ?config.options.loading_timeout, "fetch is slow");
      (config.on_loading_slow)(key, config);
      fetch.await
    }
  }
}

/// Handle given to `on_error_retry`; each call starts the next attempt of the
/// chain and records it as the key's current fetch.
fn retry_handle(
  owner: Weak<Inner>,
  key: String,
  args: FetchArgs,
  fetcher: Fetcher<Value>,
  config: Config,
) -> Revalidate {
  Arc::new(move |opts: RetryState| {
    let Some(inner) = owner.upgrade() else {
      return;
    };
    if (config.is_paused)() {
      debug!(key = %key, "paused, dropping retry");
      return;
    }

    let result = launch(
      &inner,
      key.clone(),
      args.clone(),
      Arc::clone(&fetcher),
      config.clone(),
      opts,
    );
    track(
      &inner,
      &mut lock(&inner.in_flight),
      &key,
      result,
      config.options.deduping_interval,
    );
  })
}
