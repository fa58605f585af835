//! Fetcher capability.

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::cache::Cacheable;
use crate::key::FetchArgs;

/// Produces the value for a key. Called with the key string alone, or with the
/// key's positional arguments when it was an argument list.
pub type Fetcher<T> = Arc<dyn Fn(FetchArgs) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
///
/// ```ignore
/// let fetch = fetcher(|args: FetchArgs| async move {
///   let url = args.as_str().unwrap_or_default().to_string();
///   client.get_page(&url).await
/// });
/// ```
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher<T>
where
  F: Fn(FetchArgs) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Arc::new(move |args| f(args).boxed())
}

/// Convert a typed fetcher into one producing the value's JSON form.
pub(crate) fn erase<T: Cacheable>(f: Fetcher<T>) -> Fetcher<Value> {
  Arc::new(move |args| {
    let fut = f(args);
    async move {
      let data = fut.await?;
      serde_json::to_value(data).wrap_err("fetched value could not be encoded")
    }
    .boxed()
  })
}
