//! Paginated sequences built on the revalidation scheduler.
//!
//! A sequence is described by a key loader `(page_index, previous_page) -> Key`.
//! Every pass walks the pages in order, refetching only the pages that need it,
//! and stores the assembled array under one aggregate key so all consumers of
//! the same first page share it.
//!
//! # Example
//!
//! ```ignore
//! let swr = Swr::default();
//! let pages = Infinite::new(
//!   &swr,
//!   |index, previous: Option<&Page>| {
//!     if previous.is_some_and(|p| p.items.is_empty()) {
//!       return Ok(Key::None);
//!     }
//!     Ok(Key::from(format!("/api/items?page={}", index)))
//!   },
//!   Some(fetch_page),
//!   swr.config().clone(),
//! );
//!
//! let first = pages.revalidate().await?;
//! pages.set_size(3).await?;
//! ```

mod pages;

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheResult, Cacheable};
use crate::config::Config;
use crate::error::{Result, SwrError};
use crate::fetcher::{self, Fetcher};
use crate::key::{self, FetchArgs, Key};
use crate::revalidate::{Registration, RevalidateEvent, RevalidateFn, Swr};

use pages::{PageContext, Pass};

/// Produces the key of page `index` from the previous page's data.
///
/// Returning `Key::None` (or failing) ends the sequence at that page.
pub type KeyLoader<T> = Arc<dyn Fn(usize, Option<&T>) -> color_eyre::Result<Key> + Send + Sync>;

/// Identities derived from the first page key.
#[derive(Debug, Clone)]
pub(crate) struct SequenceKeys {
  first: String,
  aggregate: String,
  aggregate_args: FetchArgs,
  context: String,
  size: String,
}

impl SequenceKeys {
  fn new(first: String) -> Self {
    let args = vec![json!("inf"), json!(first)];
    let aggregate = key::serialize(&Key::Args(args.clone()))
      .identity
      .unwrap_or_default();

    Self {
      aggregate,
      aggregate_args: FetchArgs::Args(args),
      context: key::context_key(&first),
      size: key::size_key(&first),
      first,
    }
  }
}

struct State {
  mounted: bool,
  first_page_key: Option<String>,
  /// Page count to carry over when the first page key changes
  last_page_size: usize,
  registration: Option<Registration>,
  last_focus: Option<Instant>,
}

struct Inner<T> {
  swr: Swr,
  get_key: KeyLoader<T>,
  fetcher: Option<Fetcher<Value>>,
  config: Config,
  state: Mutex<State>,
  refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for Inner<T> {
  fn drop(&mut self) {
    if let Some(task) = lock(&self.refresh).take() {
      task.abort();
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a paginated sequence.
///
/// Clones share state. Accessors always read through the cache, so they
/// reflect writes made by any consumer of the same keys.
pub struct Infinite<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for Infinite<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Cacheable> Infinite<T> {
  /// Create a sequence on `swr`.
  ///
  /// Without a `fetcher`, `config.fetcher` is used (converted through JSON);
  /// without either, pages are served from the cache only. A non-zero
  /// `refresh_interval` spawns a refresh task, so this must then be called
  /// inside a Tokio runtime.
  pub fn new<F>(swr: &Swr, get_key: F, fetcher: Option<Fetcher<T>>, config: Config) -> Self
  where
    F: Fn(usize, Option<&T>) -> color_eyre::Result<Key> + Send + Sync + 'static,
  {
    let fetcher = fetcher
      .map(fetcher::erase)
      .or_else(|| config.fetcher.clone());
    let refresh_interval = config.options.refresh_interval;

    let this = Self {
      inner: Arc::new(Inner {
        swr: swr.clone(),
        get_key: Arc::new(get_key),
        fetcher,
        state: Mutex::new(State {
          mounted: false,
          first_page_key: None,
          last_page_size: config.options.initial_size,
          registration: None,
          last_focus: None,
        }),
        config,
        refresh: Mutex::new(None),
      }),
    };

    if !refresh_interval.is_zero() {
      let task = tokio::spawn(refresh_loop(Arc::downgrade(&this.inner), refresh_interval));
      *lock(&this.inner.refresh) = Some(task);
    }

    this.sync_keys();
    this
  }

  fn from_inner(inner: Arc<Inner<T>>) -> Self {
    Self { inner }
  }

  /// Keys of the sequence as the loader currently describes it, without side
  /// effects.
  fn current_keys(&self) -> Option<SequenceKeys> {
    key::serialize_with(|| (self.inner.get_key)(0, None))
      .identity
      .map(SequenceKeys::new)
  }

  /// Re-derive the first page key, applying the page count reset rule when the
  /// sequence itself changed, and keep the revalidation registration on the
  /// current aggregate key.
  fn sync_keys(&self) -> Option<SequenceKeys> {
    let keys = self.current_keys();
    let first = keys.as_ref().map(|k| k.first.clone());
    let store = self.inner.swr.store();
    let options = &self.inner.config.options;

    let mut reset_size = None;
    {
      let mut state = lock(&self.inner.state);
      if !state.mounted {
        state.mounted = true;
        state.first_page_key = first.clone();
        if let Some(keys) = &keys {
          state.last_page_size = self.read_size(keys);
        }
        state.registration = keys.as_ref().map(|k| self.register(k));
      } else if state.first_page_key != first {
        debug!(from = ?state.first_page_key, to = ?first, "first page key changed");
        if keys.is_some() {
          reset_size = Some(if options.persist_size {
            state.last_page_size
          } else {
            options.initial_size
          });
        }
        state.first_page_key = first;
        state.registration = keys.as_ref().map(|k| self.register(k));
      }
    }

    // Written outside the lock; cache listeners may call back into us
    if let (Some(keys), Some(size)) = (&keys, reset_size) {
      if let Err(err) = store.set_as(&keys.size, &size) {
        warn!(error = %err, "failed to reset page count");
      }
    }

    keys
  }

  fn register(&self, keys: &SequenceKeys) -> Registration {
    let owner = Arc::downgrade(&self.inner);
    let handler: RevalidateFn = Arc::new(move |event| {
      let owner = owner.clone();
      async move {
        let Some(inner) = owner.upgrade() else {
          return Ok(());
        };
        let this = Infinite::from_inner(inner);
        if !this.accepts(event) {
          return Ok(());
        }
        this.revalidate().await.map(|_| ())
      }
      .boxed()
    });

    self.inner.swr.register(&keys.aggregate, handler)
  }

  /// Whether a trigger should revalidate this sequence.
  fn accepts(&self, event: RevalidateEvent) -> bool {
    let config = &self.inner.config;
    match event {
      RevalidateEvent::Mutate => true,
      RevalidateEvent::Reconnect => {
        config.options.revalidate_on_reconnect && !(config.is_paused)()
      }
      RevalidateEvent::Focus => {
        if !config.options.revalidate_on_focus || (config.is_paused)() {
          return false;
        }
        let mut state = lock(&self.inner.state);
        let throttled = state
          .last_focus
          .is_some_and(|at| at.elapsed() < config.options.focus_throttle_interval);
        if !throttled {
          state.last_focus = Some(Instant::now());
        }
        !throttled
      }
    }
  }

  fn read_size(&self, keys: &SequenceKeys) -> usize {
    match self.inner.swr.store().get_as::<usize>(&keys.size) {
      Ok(size) => size.unwrap_or(self.inner.config.options.initial_size),
      Err(err) => {
        warn!(error = %err, "unreadable page count");
        self.inner.config.options.initial_size
      }
    }
  }

  /// Key the assembled pages are cached under, if the sequence is ready.
  pub fn key(&self) -> Option<String> {
    self.current_keys().map(|k| k.aggregate)
  }

  /// Current page count.
  pub fn size(&self) -> usize {
    match self.current_keys() {
      Some(keys) => self.read_size(&keys),
      None => self.inner.config.options.initial_size,
    }
  }

  /// Assembled pages as currently cached.
  pub fn data(&self) -> Option<Vec<T>> {
    let keys = self.current_keys()?;
    match self.inner.swr.cached(&keys.aggregate) {
      Ok(data) => data,
      Err(err) => {
        warn!(error = %err, "unreadable page data");
        None
      }
    }
  }

  /// Most recent error of the sequence.
  pub fn error(&self) -> Option<SwrError> {
    let keys = self.current_keys()?;
    self.inner.swr.error(&keys.aggregate)
  }

  pub fn is_validating(&self) -> bool {
    self
      .current_keys()
      .is_some_and(|keys| self.inner.swr.is_validating(&keys.aggregate))
  }

  /// Run an assembly pass through the scheduler (dedup applies).
  ///
  /// Returns `None` without fetching when the first page key is not ready.
  pub async fn revalidate(&self) -> Result<Option<Vec<T>>> {
    let Some(keys) = self.sync_keys() else {
      return Ok(None);
    };

    let value = self
      .inner
      .swr
      .resolve_value(
        &keys.aggregate,
        keys.aggregate_args.clone(),
        self.pass_fetcher(&keys),
        &self.inner.config,
      )
      .await?;

    decode(&keys.aggregate, value).map(Some)
  }

  /// Stale-while-revalidate read.
  ///
  /// Cached pages are returned immediately while a revalidation runs in the
  /// background. Without cached pages, `suspense` waits for the load and
  /// returns its error; otherwise the load is started and `Pending` returned.
  pub async fn read(&self) -> Result<CacheResult<Vec<T>>> {
    if self.sync_keys().is_none() {
      return Ok(CacheResult::pending(None));
    }

    let error = self.error();
    match self.data() {
      Some(data) => {
        self.spawn_revalidate();
        Ok(CacheResult::from_cache(data, error))
      }
      None if self.inner.config.options.suspense => {
        let data = self.revalidate().await?.unwrap_or_default();
        Ok(CacheResult::from_network(data))
      }
      None => {
        self.spawn_revalidate();
        Ok(CacheResult::pending(error))
      }
    }
  }

  fn spawn_revalidate(&self) {
    let this = self.clone();
    tokio::spawn(async move {
      if let Err(err) = this.revalidate().await {
        debug!(error = %err, "background revalidation failed");
      }
    });
  }

  /// Replace and/or revalidate the pages.
  ///
  /// With new data and `revalidate`, only pages that changed since the
  /// current data are refetched. Without new data, every page is refetched.
  /// Returns the pages cached afterwards.
  pub async fn mutate(&self, data: Option<Vec<T>>, revalidate: bool) -> Result<Option<Vec<T>>> {
    let Some(keys) = self.sync_keys() else {
      return Ok(None);
    };

    if revalidate {
      let context = if data.is_some() {
        PageContext {
          previous_data: self.current_pages(&keys),
          force: Some(false),
        }
      } else {
        PageContext {
          previous_data: None,
          force: Some(true),
        }
      };
      self.inner.swr.store().set_as(&keys.context, &context)?;
    }

    let data = data
      .map(|d| serde_json::to_value(d).map_err(|e| SwrError::codec(&keys.aggregate, e)))
      .transpose()?;
    self.apply(&keys, data, revalidate).await
  }

  /// Derive new pages from the current ones and revalidate the pages that
  /// changed.
  pub async fn mutate_with<F>(&self, update: F) -> Result<Option<Vec<T>>>
  where
    F: FnOnce(Option<Vec<T>>) -> Option<Vec<T>>,
  {
    let Some(keys) = self.sync_keys() else {
      return Ok(None);
    };

    let context = PageContext {
      previous_data: self.current_pages(&keys),
      force: Some(false),
    };
    self.inner.swr.store().set_as(&keys.context, &context)?;

    let data = update(self.data())
      .map(|d| serde_json::to_value(d).map_err(|e| SwrError::codec(&keys.aggregate, e)))
      .transpose()?;
    self.apply(&keys, data, true).await
  }

  async fn apply(
    &self,
    keys: &SequenceKeys,
    data: Option<Value>,
    revalidate: bool,
  ) -> Result<Option<Vec<T>>> {
    self
      .inner
      .swr
      .mutate(&keys.aggregate, data, revalidate)
      .await?
      .map(|value| decode(&keys.aggregate, value))
      .transpose()
  }

  /// Set the page count and revalidate; only new or changed pages are fetched.
  pub async fn set_size(&self, size: usize) -> Result<Option<Vec<T>>> {
    self.set_size_with(|_| size).await
  }

  /// Set the page count from the current one.
  pub async fn set_size_with<F>(&self, update: F) -> Result<Option<Vec<T>>>
  where
    F: FnOnce(usize) -> usize,
  {
    let Some(keys) = self.sync_keys() else {
      return Ok(None);
    };

    let size = update(self.read_size(&keys));
    debug!(sequence = %keys.first, size, "set page count");
    self.inner.swr.store().set_as(&keys.size, &size)?;
    lock(&self.inner.state).last_page_size = size;

    self.mutate_with(|current| current).await
  }

  fn current_pages(&self, keys: &SequenceKeys) -> Option<Vec<Value>> {
    match self.inner.swr.store().get(&keys.aggregate) {
      Some(Value::Array(pages)) => Some(pages),
      _ => None,
    }
  }

  fn pass_fetcher(&self, keys: &SequenceKeys) -> Fetcher<Value> {
    let owner = Arc::downgrade(&self.inner);
    let keys = keys.clone();
    Arc::new(move |_args: FetchArgs| {
      let owner = owner.clone();
      let keys = keys.clone();
      async move {
        let inner = owner
          .upgrade()
          .ok_or_else(|| color_eyre::Report::new(SwrError::detached(&keys.aggregate)))?;
        let pass = Pass {
          swr: &inner.swr,
          get_key: &inner.get_key,
          fetcher: inner.fetcher.as_ref(),
          config: &inner.config,
          keys: &keys,
        };
        pass.run().await.map_err(color_eyre::Report::new)
      }
      .boxed()
    })
  }
}

impl<T> std::fmt::Debug for Infinite<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = lock(&self.inner.state);
    f.debug_struct("Infinite")
      .field("first_page_key", &state.first_page_key)
      .field("last_page_size", &state.last_page_size)
      .finish_non_exhaustive()
  }
}

fn decode<T: Cacheable>(key: &str, value: Value) -> Result<Vec<T>> {
  serde_json::from_value(value).map_err(|e| SwrError::codec(key, e))
}

/// Periodic revalidation, skipped while hidden, offline or paused unless
/// configured otherwise. Ends once the sequence is dropped.
async fn refresh_loop<T: Cacheable>(owner: Weak<Inner<T>>, interval: std::time::Duration) {
  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  loop {
    ticker.tick().await;
    let Some(inner) = owner.upgrade() else {
      break;
    };

    let skip = {
      let config = &inner.config;
      let env = &config.environment;
      (!config.options.refresh_when_hidden && !env.is_visible())
        || (!config.options.refresh_when_offline && !env.is_online())
        || (config.is_paused)()
    };
    if skip {
      continue;
    }

    let this = Infinite::from_inner(inner);
    if let Err(err) = this.revalidate().await {
      debug!(error = %err, "refresh failed");
    }
  }
}
