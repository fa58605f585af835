//! Stale-while-revalidate caching with deduplicated fetches, retry backoff and
//! paginated sequences.
//!
//! [`Swr`] is the shared engine: every consumer holding a clone of it sees one
//! cache and one set of in-flight fetches. [`Infinite`] builds page sequences
//! on top of it, refetching only the pages that need it.
//!
//! ```ignore
//! use swr_pager::{fetcher, Config, FetchArgs, Infinite, Key, Swr};
//!
//! let swr = Swr::new(Config::default());
//! let fetch = fetcher(|args: FetchArgs| async move {
//!   let page = args.as_str().unwrap_or_default().to_uppercase();
//!   Ok(page)
//! });
//!
//! let pages = Infinite::new(
//!   &swr,
//!   |index, _previous: Option<&String>| Ok(Key::from(format!("page-{}", index))),
//!   Some(fetch),
//!   swr.config().clone(),
//! );
//!
//! assert_eq!(pages.revalidate().await?, Some(vec!["PAGE-0".to_string()]));
//! pages.set_size(2).await?;
//! ```

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod infinite;
pub mod key;
pub mod revalidate;

pub use cache::{CacheProvider, CacheResult, CacheSource, MemoryCache, Store};
pub use config::{Config, Options};
pub use env::{Environment, StaticEnvironment};
pub use error::{Result, SwrError};
pub use fetcher::{fetcher, Fetcher};
pub use infinite::{Infinite, KeyLoader};
pub use key::{FetchArgs, Key};
pub use revalidate::{RetryState, RevalidateEvent, Swr};
