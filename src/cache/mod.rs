//! Policy-driven HTTP response cache with offline support.
//!
//! This module provides the request interceptor that:
//! - Resolves a caching policy (strategy, store, max age) per URL
//! - Serves requests with cache-first, network-first, stale-while-revalidate,
//!   network-only or cache-only strategies
//! - Synthesizes offline responses when neither network nor cache can answer
//! - Manages versioned stores across releases and answers control messages

mod fallback;
mod layer;
mod lifecycle;
mod policy;
mod request;
mod result;
mod storage;
mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use layer::CacheLayer;
pub use lifecycle::{spawn_control_plane, CacheUrlsPayload, ControlMessage, ControlReply};
pub use policy::{PolicyTable, Strategy};
pub use request::{HttpRequest, HttpResponse};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage, StoreClass, StoreNames};
