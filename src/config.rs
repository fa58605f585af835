use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheProvider, MemoryCache};
use crate::env::{Environment, StaticEnvironment};
use crate::error::SwrError;
use crate::fetcher::Fetcher;
use crate::http;
use crate::revalidate::retry::{self, Revalidate, RetryState};

/// Deep-equality check used to decide whether a page changed upstream.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;
pub type PausedFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(&Value, &str, &Config) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&SwrError, &str, &Config) + Send + Sync>;
pub type LoadingSlowHook = Arc<dyn Fn(&str, &Config) + Send + Sync>;
pub type ErrorRetryHook =
  Arc<dyn Fn(&SwrError, &str, &Config, Revalidate, RetryState) + Send + Sync>;

/// Switches, timeouts and pagination settings.
///
/// This is the part of the configuration that can be read from a file;
/// durations are written as milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Options {
  pub revalidate_on_focus: bool,
  pub revalidate_on_reconnect: bool,
  pub refresh_when_hidden: bool,
  pub refresh_when_offline: bool,
  pub should_retry_on_error: bool,
  /// Reads without data wait for the first load and return its error
  pub suspense: bool,

  #[serde(deserialize_with = "deserialize_millis")]
  pub error_retry_interval: Duration,
  /// Maximum retry count; unbounded when unset
  pub error_retry_count: Option<u32>,
  #[serde(deserialize_with = "deserialize_millis")]
  pub focus_throttle_interval: Duration,
  #[serde(deserialize_with = "deserialize_millis")]
  pub deduping_interval: Duration,
  #[serde(deserialize_with = "deserialize_millis")]
  pub loading_timeout: Duration,
  /// Periodic revalidation; zero disables it
  #[serde(deserialize_with = "deserialize_millis")]
  pub refresh_interval: Duration,

  /// Pages loaded before any size change
  pub initial_size: usize,
  /// Refetch every page on each revalidation, not just the first
  pub revalidate_all: bool,
  /// Keep the page count when the first page key changes
  pub persist_size: bool,
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let ms = u64::deserialize(deserializer)?;
  Ok(Duration::from_millis(ms))
}

impl Default for Options {
  fn default() -> Self {
    Self::for_connection(false)
  }
}

impl Options {
  /// Defaults for a normal or a slow (low-bandwidth, data-saving) connection.
  pub fn for_connection(slow: bool) -> Self {
    Self {
      revalidate_on_focus: true,
      revalidate_on_reconnect: true,
      refresh_when_hidden: false,
      refresh_when_offline: false,
      should_retry_on_error: true,
      suspense: false,

      error_retry_interval: Duration::from_secs(if slow { 10 } else { 5 }),
      error_retry_count: None,
      focus_throttle_interval: Duration::from_secs(5),
      deduping_interval: Duration::from_secs(2),
      loading_timeout: Duration::from_secs(if slow { 5 } else { 3 }),
      refresh_interval: Duration::ZERO,

      initial_size: 1,
      revalidate_all: false,
      persist_size: false,
    }
  }

  /// Load options from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./swr-pager.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swr-pager/config.yaml
  ///
  /// Without any file the defaults are returned.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swr-pager.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swr-pager").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

/// Full configuration: options plus providers and event hooks.
#[derive(Clone)]
pub struct Config {
  pub options: Options,

  // providers
  /// Default fetcher for consumers that don't bring their own
  pub fetcher: Option<Fetcher<Value>>,
  pub compare: Comparator,
  pub is_paused: PausedFn,
  /// Store backing an engine. Only read by `Swr::new`; the `Config` given to
  /// `Swr::resolve` or `Infinite::new` always goes through its engine's store.
  pub cache: Arc<dyn CacheProvider>,
  pub environment: Arc<dyn Environment>,

  // events
  pub on_loading_slow: LoadingSlowHook,
  pub on_success: SuccessHook,
  pub on_error: ErrorHook,
  pub on_error_retry: ErrorRetryHook,
}

impl Default for Config {
  fn default() -> Self {
    Self::for_environment(Arc::new(StaticEnvironment::new()))
  }
}

impl Config {
  /// Defaults derived from the given environment.
  pub fn for_environment(environment: Arc<dyn Environment>) -> Self {
    Self {
      options: Options::for_connection(environment.is_slow_connection()),
      fetcher: Some(http::json_fetcher(reqwest::Client::new())),
      compare: Arc::new(|a, b| a == b),
      is_paused: Arc::new(|| false),
      cache: Arc::new(MemoryCache::new()),
      environment,
      on_loading_slow: Arc::new(|_, _| {}),
      on_success: Arc::new(|_, _, _| {}),
      on_error: Arc::new(|_, _, _| {}),
      on_error_retry: Arc::new(retry::on_error_retry),
    }
  }

  pub fn with_options(mut self, options: Options) -> Self {
    self.options = options;
    self
  }

  pub fn with_fetcher(mut self, fetcher: Option<Fetcher<Value>>) -> Self {
    self.fetcher = fetcher;
    self
  }

  pub fn with_cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
    self.cache = cache;
    self
  }

  pub fn with_compare(mut self, compare: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
    self.compare = Arc::new(compare);
    self
  }

  pub fn with_is_paused(mut self, is_paused: impl Fn() -> bool + Send + Sync + 'static) -> Self {
    self.is_paused = Arc::new(is_paused);
    self
  }

  pub fn on_loading_slow(mut self, hook: impl Fn(&str, &Config) + Send + Sync + 'static) -> Self {
    self.on_loading_slow = Arc::new(hook);
    self
  }

  pub fn on_success(
    mut self,
    hook: impl Fn(&Value, &str, &Config) + Send + Sync + 'static,
  ) -> Self {
    self.on_success = Arc::new(hook);
    self
  }

  pub fn on_error(mut self, hook: impl Fn(&SwrError, &str, &Config) + Send + Sync + 'static) -> Self {
    self.on_error = Arc::new(hook);
    self
  }

  pub fn on_error_retry(
    mut self,
    hook: impl Fn(&SwrError, &str, &Config, Revalidate, RetryState) + Send + Sync + 'static,
  ) -> Self {
    self.on_error_retry = Arc::new(hook);
    self
  }

  /// Configuration for single-page fetches inside a paginated pass: no dedup
  /// window, no retries and no hooks, since the aggregate owns those.
  pub(crate) fn for_pages(&self) -> Config {
    let mut config = self.clone();
    config.options.deduping_interval = Duration::ZERO;
    config.options.should_retry_on_error = false;
    config.on_loading_slow = Arc::new(|_, _| {});
    config.on_success = Arc::new(|_, _, _| {});
    config.on_error = Arc::new(|_, _, _| {});
    config
  }
}

impl std::fmt::Debug for Config {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Config")
      .field("options", &self.options)
      .field("has_fetcher", &self.fetcher.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_follow_connection() {
    let normal = Config::default();
    assert_eq!(normal.options.error_retry_interval, Duration::from_millis(5000));
    assert_eq!(normal.options.loading_timeout, Duration::from_millis(3000));
    assert_eq!(normal.options.deduping_interval, Duration::from_millis(2000));
    assert_eq!(normal.options.initial_size, 1);

    let env = Arc::new(StaticEnvironment::new().with_slow_connection(true));
    let slow = Config::for_environment(env);
    assert_eq!(slow.options.error_retry_interval, Duration::from_millis(10000));
    assert_eq!(slow.options.loading_timeout, Duration::from_millis(5000));
  }

  #[test]
  fn test_options_from_yaml() {
    let options = Options::from_yaml(
      "deduping_interval: 500\nerror_retry_count: 3\ninitial_size: 2\npersist_size: true\n",
    )
    .unwrap();

    assert_eq!(options.deduping_interval, Duration::from_millis(500));
    assert_eq!(options.error_retry_count, Some(3));
    assert_eq!(options.initial_size, 2);
    assert!(options.persist_size);
    // untouched fields keep their defaults
    assert!(options.revalidate_on_focus);
    assert_eq!(options.error_retry_interval, Duration::from_millis(5000));
  }

  #[test]
  fn test_empty_yaml_is_default() {
    assert_eq!(Options::from_yaml("").unwrap(), Options::default());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Options::load(Some(Path::new("/nonexistent/swr-pager.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_default_compare_is_deep_equality() {
    let config = Config::default();
    let a = serde_json::json!({"items": [1, 2], "next": null});
    let b = serde_json::json!({"next": null, "items": [1, 2]});
    assert!((config.compare)(&a, &b));
    assert!(!(config.compare)(&a, &serde_json::json!({"items": [1]})));
  }

  #[test]
  fn test_page_config_disables_dedup_and_retry() {
    let config = Config::default().for_pages();
    assert_eq!(config.options.deduping_interval, Duration::ZERO);
    assert!(!config.options.should_retry_on_error);
  }
}
