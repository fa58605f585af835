//! Cache store shared by the scheduler and the pagination controller.
//!
//! This module provides the cache provider contract and its default
//! implementation:
//! - Values are kept as JSON so one store can hold pages, page counts,
//!   revalidation contexts and errors side by side
//! - Writes are visible to the next read immediately
//! - Subscribers are told about every write and delete

mod storage;
mod store;
mod traits;

pub use storage::MemoryCache;
pub use store::Store;
pub use traits::{CacheProvider, CacheResult, CacheSource, Cacheable, Listener, Subscription};
