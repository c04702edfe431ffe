//! The five fetch/cache strategies.
//!
//! Every strategy except network-only resolves to a response: network errors
//! are caught here and turned into a cached or synthesized answer.

use chrono::Utc;
use color_eyre::Result;
use std::time::Duration;
use tracing::{debug, warn};

use super::fallback;
use super::layer::CacheLayer;
use super::policy::Strategy;
use super::request::{HttpRequest, HttpResponse};
use super::result::CacheResult;
use super::storage::CacheStorage;
use crate::network::Network;

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  /// Run `strategy` for a GET request against the named store.
  pub async fn execute(
    &self,
    strategy: Strategy,
    request: &HttpRequest,
    store: &str,
    max_age: Duration,
  ) -> Result<CacheResult> {
    let result = match strategy {
      Strategy::CacheFirst => self.cache_first(request, store, max_age).await,
      Strategy::NetworkFirst => self.network_first(request, store, max_age).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, store, max_age).await,
      Strategy::NetworkOnly => return self.network_only(request).await,
      Strategy::CacheOnly => self.cache_only(request, store, max_age),
    };
    Ok(result)
  }

  /// Fresh cache hit without touching the network; otherwise fetch and
  /// write through, degrading to the stale entry if the fetch fails.
  async fn cache_first(&self, request: &HttpRequest, store: &str, max_age: Duration) -> CacheResult {
    let cached = self.read_entry(store, &request.key());

    if let Some(entry) = &cached {
      if entry.is_fresh(max_age, Utc::now()) {
        debug!(url = %request.url, "Cache hit");
        return CacheResult::from_cache(entry.clone(), true);
      }
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_through(store, request, &response);
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Network failed");
        match cached {
          Some(entry) => CacheResult::offline(entry),
          None => CacheResult::fallback(fallback::synthesize(request)),
        }
      }
    }
  }

  /// Always try the network; any cached entry, however old, is the fallback.
  ///
  /// `max_age` only decides how a cached answer is labelled.
  async fn network_first(
    &self,
    request: &HttpRequest,
    store: &str,
    max_age: Duration,
  ) -> CacheResult {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_through(store, request, &response);
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Network failed, trying cache");
        match self.read_entry(store, &request.key()) {
          Some(entry) => {
            if !entry.is_fresh(max_age, Utc::now()) {
              debug!(url = %request.url, captured_at = %entry.captured_at, "Serving stale entry");
            }
            CacheResult::offline(entry)
          }
          None => CacheResult::fallback(fallback::synthesize(request)),
        }
      }
    }
  }

  /// Answer from cache immediately and refresh it in the background.
  ///
  /// The refresh runs as a detached task; a reader right after this call
  /// may or may not see its write. With nothing cached the caller waits
  /// for that same fetch, and only a failed fetch yields the fallback.
  async fn stale_while_revalidate(
    &self,
    request: &HttpRequest,
    store: &str,
    max_age: Duration,
  ) -> CacheResult {
    let revalidation = {
      let layer = self.clone();
      let request = request.clone();
      let store = store.to_string();
      tokio::spawn(async move { layer.revalidate(&request, &store).await })
    };

    if let Some(entry) = self.read_entry(store, &request.key()) {
      let fresh = entry.is_fresh(max_age, Utc::now());
      debug!(url = %request.url, fresh, "Serving cached entry while revalidating");
      return CacheResult::from_cache(entry, fresh);
    }

    match revalidation.await {
      Ok(Some(response)) => CacheResult::from_network(response),
      Ok(None) => CacheResult::fallback(fallback::synthesize(request)),
      Err(e) => {
        warn!(url = %request.url, error = %e, "Revalidation task failed");
        CacheResult::fallback(fallback::synthesize(request))
      }
    }
  }

  /// Background half of stale-while-revalidate. Failures are logged only.
  async fn revalidate(&self, request: &HttpRequest, store: &str) -> Option<HttpResponse> {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_through(store, request, &response);
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Background revalidation failed");
        None
      }
    }
  }

  /// Straight to the network; errors reach the caller unchanged.
  async fn network_only(&self, request: &HttpRequest) -> Result<CacheResult> {
    self
      .network
      .fetch(request)
      .await
      .map(CacheResult::from_network)
  }

  fn cache_only(&self, request: &HttpRequest, store: &str, max_age: Duration) -> CacheResult {
    match self.read_entry(store, &request.key()) {
      Some(entry) => {
        let fresh = entry.is_fresh(max_age, Utc::now());
        CacheResult::from_cache(entry, fresh)
      }
      None => CacheResult::fallback(fallback::synthesize(request)),
    }
  }
}
