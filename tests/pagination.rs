use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swr_pager::cache::CacheProvider;
use swr_pager::key;
use swr_pager::{fetcher, Config, FetchArgs, Fetcher, Infinite, Key, MemoryCache, Swr};

/// Fetcher returning the upper-cased key, recording every call.
fn recording_fetcher() -> (Fetcher<String>, Arc<Mutex<Vec<String>>>) {
  let calls = Arc::new(Mutex::new(Vec::new()));
  let log = Arc::clone(&calls);
  let f = fetcher(move |args: FetchArgs| {
    let key = args.as_str().unwrap_or_default().to_string();
    log.lock().unwrap().push(key.clone());
    async move { Ok(key.to_uppercase()) }
  });
  (f, calls)
}

fn letter_keys(index: usize, _previous: Option<&String>) -> color_eyre::Result<Key> {
  Ok(Key::from(((b'a' + index as u8) as char).to_string()))
}

fn offline_config() -> Config {
  Config::default().with_fetcher(None)
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_first_page_only() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());

  let data = pages.revalidate().await.unwrap();

  assert_eq!(data, Some(strings(&["A"])));
  assert_eq!(*calls.lock().unwrap(), vec!["a"]);
  assert_eq!(pages.size(), 1);
}

#[tokio::test]
async fn test_set_size_loads_only_new_pages() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());
  pages.revalidate().await.unwrap();

  let data = pages.set_size(2).await.unwrap();

  assert_eq!(data, Some(strings(&["A", "B"])));
  assert_eq!(swr.store().get(&key::size_key("a")), Some(json!(2)));
  assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_set_size_is_idempotent() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());

  let first = pages.set_size(2).await.unwrap();
  let record = swr.store().get(&key::size_key("a"));
  let second = pages.set_size(2).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(swr.store().get(&key::size_key("a")), record);
  assert_eq!(second.map(|d| d.len()), Some(2));
  assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_set_size_with_grows_from_current() {
  let swr = Swr::new(offline_config());
  let (f, _) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());
  pages.revalidate().await.unwrap();

  pages.set_size_with(|n| n + 2).await.unwrap();

  assert_eq!(pages.size(), 3);
  assert_eq!(pages.data(), Some(strings(&["A", "B", "C"])));
}

#[tokio::test]
async fn test_revalidate_all_refetches_cached_pages() {
  let swr = Swr::new(offline_config());
  swr.store().set("a", json!("old-a"));
  swr.store().set("b", json!("old-b"));
  let (f, calls) = recording_fetcher();
  let mut config = offline_config();
  config.options.initial_size = 2;
  config.options.revalidate_all = true;
  let pages = Infinite::new(&swr, letter_keys, Some(f), config);

  let data = pages.revalidate().await.unwrap();

  assert_eq!(data, Some(strings(&["A", "B"])));
  assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_cached_pages_are_reused_without_revalidate_all() {
  let swr = Swr::new(offline_config());
  swr.store().set("a", json!("old-a"));
  swr.store().set("b", json!("old-b"));
  let (f, calls) = recording_fetcher();
  let mut config = offline_config();
  config.options.initial_size = 2;
  let pages = Infinite::new(&swr, letter_keys, Some(f), config);

  let data = pages.revalidate().await.unwrap();

  assert_eq!(data, Some(strings(&["old-a", "old-b"])));
  assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_not_ready_key_ends_sequence() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let mut config = offline_config();
  config.options.initial_size = 3;
  let loader = |index: usize, _: Option<&String>| {
    if index == 1 {
      Ok(Key::None)
    } else {
      letter_keys(index, None)
    }
  };
  let pages = Infinite::new(&swr, loader, Some(f), config);

  let data = pages.revalidate().await.unwrap();

  assert_eq!(data, Some(strings(&["A"])));
  assert_eq!(*calls.lock().unwrap(), vec!["a"]);
}

#[tokio::test]
async fn test_failing_key_loader_ends_sequence() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let mut config = offline_config();
  config.options.initial_size = 3;
  let loader = |index: usize, previous: Option<&String>| match (index, previous) {
    (0, _) => Ok(Key::from("a")),
    (1, Some(previous)) => Ok(Key::from(format!("{}-next", previous.to_lowercase()))),
    _ => Err(color_eyre::eyre::eyre!("cursor exhausted")),
  };
  let pages = Infinite::new(&swr, loader, Some(f), config);

  let data = pages.revalidate().await.unwrap();

  assert_eq!(data, Some(strings(&["A", "A-NEXT"])));
  assert_eq!(*calls.lock().unwrap(), vec!["a", "a-next"]);
}

#[tokio::test]
async fn test_local_mutation_reads_back_without_refetch() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());
  pages.revalidate().await.unwrap();

  let written = pages.mutate(Some(strings(&["local"])), false).await.unwrap();

  assert_eq!(written, Some(strings(&["local"])));
  assert_eq!(pages.data(), Some(strings(&["local"])));
  assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_local_mutation_survives_read() {
  let swr = Swr::new(offline_config());
  let (f, calls) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), offline_config());
  pages.revalidate().await.unwrap();
  pages.mutate(Some(strings(&["local"])), false).await.unwrap();

  let read = pages.read().await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert_eq!(read.data, Some(strings(&["local"])));
  assert_eq!(pages.data(), Some(strings(&["local"])));
  assert_eq!(*calls.lock().unwrap(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_after_budget() {
  let calls = Arc::new(AtomicU32::new(0));
  let f: Fetcher<String> = {
    let calls = Arc::clone(&calls);
    fetcher(move |_| {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      async move { Err(color_eyre::eyre::eyre!("failure {}", n)) }
    })
  };
  let mut config = offline_config();
  config.options.error_retry_count = Some(2);
  config.options.error_retry_interval = Duration::from_millis(10);
  let swr = Swr::new(config.clone());
  let pages = Infinite::new(&swr, letter_keys, Some(f), config);

  let err = pages.revalidate().await.unwrap_err();
  assert!(err.to_string().ends_with("failure 1"));

  tokio::time::sleep(Duration::from_secs(120)).await;

  assert_eq!(calls.load(Ordering::SeqCst), 3);
  let last = pages.error().unwrap();
  assert!(last.to_string().ends_with("failure 3"));
  assert_eq!(pages.data(), None);
  assert!(!pages.is_validating());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolves_fetch_once() {
  let swr = Swr::new(offline_config());
  let config = swr.config().clone();
  let calls = Arc::new(AtomicU32::new(0));
  let f: Fetcher<u32> = {
    let calls = Arc::clone(&calls);
    fetcher(move |_| {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(n)
      }
    })
  };

  let key = Key::args([json!("/items"), json!(1)]);
  let results = futures::future::join_all((0..5).map(|_| swr.resolve(&key, Arc::clone(&f), &config))).await;

  assert!(results.into_iter().all(|r| r.unwrap() == Some(1)));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_cache_provider_sees_writes() {
  let cache = Arc::new(MemoryCache::new());
  let written = Arc::new(Mutex::new(Vec::new()));
  let _subscription = {
    let written = Arc::clone(&written);
    cache.subscribe(Arc::new(move |key: &str| written.lock().unwrap().push(key.to_string())))
  };

  let config = offline_config().with_cache(cache.clone());
  let swr = Swr::new(config.clone());
  let (f, _) = recording_fetcher();
  let pages = Infinite::new(&swr, letter_keys, Some(f), config);
  pages.revalidate().await.unwrap();

  let aggregate = pages.key().unwrap();
  let written = written.lock().unwrap();
  assert!(written.contains(&"a".to_string()));
  assert!(written.contains(&aggregate));
  assert_eq!(cache.get(&aggregate), Some(json!(["A"])));
}
