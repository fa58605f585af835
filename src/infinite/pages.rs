//! One assembly pass over the pages of a sequence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{KeyLoader, SequenceKeys};
use crate::cache::Cacheable;
use crate::config::Config;
use crate::error::{Result, SwrError};
use crate::fetcher::Fetcher;
use crate::key;
use crate::revalidate::Swr;

/// Left in the cache by a mutate call, consumed by the next pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct PageContext {
  /// Pages as they were when the mutation happened
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_data: Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub force: Option<bool>,
}

/// Inputs of the per-page refetch decision.
pub(crate) struct PageCheck<'a> {
  pub index: usize,
  pub revalidate_all: bool,
  pub force: Option<bool>,
  pub cached: Option<&'a Value>,
  /// The sequence already produced data before this pass
  pub has_previous_data: bool,
  pub context_data: Option<&'a [Value]>,
  pub compare: &'a (dyn Fn(&Value, &Value) -> bool + Send + Sync),
}

/// A page is (re)fetched when any of these hold:
/// - every page revalidates
/// - a mutation forced it
/// - nothing is cached for it
/// - it is the first page of an unforced revalidation
/// - it differs from what it was when the mutation happened
pub(crate) fn should_fetch_page(check: &PageCheck<'_>) -> bool {
  let Some(cached) = check.cached else {
    return true;
  };

  if check.revalidate_all || check.force == Some(true) {
    return true;
  }

  if check.force.is_none() && check.index == 0 && check.has_previous_data {
    return true;
  }

  match check.context_data {
    Some(pages) => {
      let before = pages.get(check.index).unwrap_or(&Value::Null);
      !(check.compare)(before, cached)
    }
    None => false,
  }
}

pub(crate) struct Pass<'a, T> {
  pub swr: &'a Swr,
  pub get_key: &'a KeyLoader<T>,
  pub fetcher: Option<&'a Fetcher<Value>>,
  pub config: &'a Config,
  pub keys: &'a SequenceKeys,
}

impl<T: Cacheable> Pass<'_, T> {
  /// Walk the pages in order, refetching where needed, and return them as a
  /// JSON array. Each page key may depend on the previous page, so pages are
  /// never fetched concurrently.
  pub async fn run(&self) -> Result<Value> {
    let store = self.swr.store();
    let options = &self.config.options;

    let page_size = store
      .get_as::<usize>(&self.keys.size)?
      .unwrap_or(options.initial_size);

    let context = store
      .get_as::<PageContext>(&self.keys.context)?
      .unwrap_or_default();
    store.delete(&self.keys.context);

    let has_previous_data = store.get(&self.keys.aggregate).is_some();
    let page_config = self.config.for_pages();

    let mut data = Vec::with_capacity(page_size);
    let mut previous_page: Option<T> = None;

    for index in 0..page_size {
      let page_key = key::serialize_with(|| (self.get_key)(index, previous_page.as_ref()));
      let (Some(identity), Some(args)) = (page_key.identity(), page_key.fetch_args()) else {
        debug!(sequence = %self.keys.first, index, "page key not ready, sequence ends");
        break;
      };

      let cached = store.get(identity);
      let fetch = should_fetch_page(&PageCheck {
        index,
        revalidate_all: options.revalidate_all,
        force: context.force,
        cached: cached.as_ref(),
        has_previous_data,
        context_data: context.previous_data.as_deref(),
        compare: self.config.compare.as_ref(),
      });

      let value = match (fetch, self.fetcher, cached) {
        (true, Some(fetcher), _) => {
          debug!(sequence = %self.keys.first, index, page = identity, "fetching page");
          self
            .swr
            .resolve_value(identity, args, fetcher.clone(), &page_config)
            .await?
        }
        (_, _, Some(cached)) => cached,
        (_, _, None) => {
          debug!(sequence = %self.keys.first, index, "no fetcher and page not cached, sequence ends");
          break;
        }
      };

      previous_page = Some(
        serde_json::from_value(value.clone()).map_err(|e| SwrError::codec(identity, e))?,
      );
      data.push(value);
    }

    Ok(Value::Array(data))
  }
}
