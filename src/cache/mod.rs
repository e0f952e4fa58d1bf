//! Response cache used to make activities available offline.
//!
//! This module provides:
//! - Cache key normalization shared by the write path (caching jobs) and the
//!   read path (request routing)
//! - A caching job engine that fetches many URLs concurrently and reports one
//!   outcome per distinct cache key
//! - A cache-only router that answers intercepted requests, including byte
//!   ranges sliced from the stored full response

mod fetch;
mod job;
mod key;
mod range;
mod route;
mod storage;
mod traits;

pub use fetch::{Fetcher, HttpFetcher};
pub use job::CacheJobEngine;
pub use key::CacheKeys;
pub use route::{CacheRouter, RouteDecision};
pub use storage::{ResponseStorage, SqliteResponseStorage};
pub use traits::{CacheEntry, CacheOutcome, FetchRequest, JobEvent, RequestOptions, ResponseRecord};

#[cfg(test)]
pub(crate) use fetch::testing;
