//! Outcome of serving a request, with metadata about where it came from.

use chrono::{DateTime, Utc};

use super::request::{CachedEntry, HttpResponse};

/// A served response plus its provenance.
#[derive(Debug, Clone)]
pub struct CacheResult {
  /// The response handed back to the caller
  pub response: HttpResponse,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was captured (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  pub fn from_network(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CachedEntry, is_fresh: bool) -> Self {
    Self {
      cached_at: Some(entry.captured_at),
      source: if is_fresh {
        CacheSource::CacheFresh
      } else {
        CacheSource::CacheStale
      },
      response: entry.into_response(),
    }
  }

  /// Cached entry served because the network failed.
  pub fn offline(entry: CachedEntry) -> Self {
    Self {
      cached_at: Some(entry.captured_at),
      source: CacheSource::Offline,
      response: entry.into_response(),
    }
  }

  /// Synthesized placeholder, nothing else was available.
  pub fn fallback(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Fallback,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, inside its freshness window
  CacheFresh,
  /// Data from cache, past its freshness window
  CacheStale,
  /// Network unavailable, serving cached data
  Offline,
  /// Network and cache both unavailable, placeholder response
  Fallback,
}

impl CacheSource {
  pub fn as_str(self) -> &'static str {
    match self {
      CacheSource::Network => "network",
      CacheSource::CacheFresh => "cache (fresh)",
      CacheSource::CacheStale => "cache (stale)",
      CacheSource::Offline => "cache (offline)",
      CacheSource::Fallback => "offline fallback",
    }
  }
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
