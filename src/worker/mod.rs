//! Background caching worker and the message protocol used to drive it.
//!
//! The worker runs as its own task and only talks to callers through
//! messages. A caller asks for a caching job by posting a
//! `CACHE_ENTRIES_WITH_PROGRESS` message with a private port attached; the
//! worker streams one message per entry on that port followed by a single
//! `CACHING_FINISHED`.

mod bridge;
mod port;
mod protocol;
mod worker;

pub use bridge::{cache_offline_manifest, cache_urls_with_progress, CachingProgress};
pub use protocol::WorkerMessage;
pub use worker::{Worker, WorkerHandle, WorkerState};
