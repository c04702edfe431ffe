//! Cache layer that intercepts requests and routes them through a strategy.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::policy::PolicyTable;
use super::request::{CachedEntry, HttpRequest, HttpResponse, RequestKey};
use super::result::CacheResult;
use super::storage::{CacheStorage, StoreNames};
use crate::network::Network;

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network, choosing a
/// strategy per request from the policy table and falling back to
/// synthesized offline responses when nothing else can answer.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  pub(super) storage: Arc<S>,
  pub(super) network: Arc<N>,
  pub(super) policies: Arc<PolicyTable>,
  pub(super) names: StoreNames,
  /// Base for relative URLs
  pub(super) origin: Option<Url>,
  /// Static assets warmed up on install
  pub(super) precache: Arc<Vec<Url>>,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, policies: PolicyTable, names: StoreNames) -> Self {
    Self {
      storage,
      network,
      policies: Arc::new(policies),
      names,
      origin: None,
      precache: Arc::new(Vec::new()),
    }
  }

  pub fn with_origin(mut self, origin: Url) -> Self {
    self.origin = Some(origin);
    self
  }

  pub fn with_precache(mut self, urls: Vec<Url>) -> Self {
    self.precache = Arc::new(urls);
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn names(&self) -> &StoreNames {
    &self.names
  }

  pub fn policies(&self) -> &PolicyTable {
    &self.policies
  }

  /// Resolve an absolute URL, or a path relative to the origin.
  pub fn resolve_url(&self, url: &str) -> Result<Url> {
    match Url::parse(url) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .origin
        .as_ref()
        .ok_or_else(|| eyre!("Relative URL {} needs an origin to be configured", url))?
        .join(url)
        .map_err(|e| eyre!("Invalid URL {}: {}", url, e)),
      Err(e) => Err(eyre!("Invalid URL {}: {}", url, e)),
    }
  }

  /// Serve a request.
  ///
  /// Non-GET requests go straight to the network and never touch a store.
  /// GET requests are routed through the strategy their policy selects.
  /// Only network-only and pass-through requests can return an error.
  pub async fn handle(&self, request: &HttpRequest) -> Result<CacheResult> {
    if !request.is_get() {
      debug!(method = %request.method, url = %request.url, "Passing through non-GET request");
      return self
        .network
        .fetch(request)
        .await
        .map(CacheResult::from_network);
    }

    let rule = self.policies.resolve(request);
    let store = self.names.name(rule.store);
    debug!(
      url = %request.url,
      strategy = %rule.strategy,
      store = %store,
      "Resolved cache policy"
    );

    self
      .execute(rule.strategy, request, &store, rule.max_age)
      .await
  }

  /// Read an entry; storage failures count as a miss.
  pub(super) fn read_entry(&self, store: &str, key: &RequestKey) -> Option<CachedEntry> {
    let store = self.storage.open(store);
    match store.match_entry(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(store = store.name(), key = %key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Store a successful response. Failures are logged and swallowed.
  pub(super) fn write_through(&self, store: &str, request: &HttpRequest, response: &HttpResponse) {
    if !response.is_ok() {
      return;
    }

    let entry = CachedEntry::capture(&request.url, response, Utc::now());
    if let Err(e) = self.storage.open(store).put(&request.key(), &entry) {
      warn!(store, url = %request.url, error = %e, "Cache write failed");
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      policies: Arc::clone(&self.policies),
      names: self.names.clone(),
      origin: self.origin.clone(),
      precache: Arc::clone(&self.precache),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::policy::{PolicyRule, Strategy, UrlPattern};
  use crate::cache::result::CacheSource;
  use crate::cache::storage::{MemoryStorage, StoreClass};
  use crate::cache::testing::{url, FailingStorage, FakeNetwork};
  use reqwest::Method;
  use std::time::Duration;

  const THIRTY_DAYS_MS: u64 = 2_592_000_000;

  fn images_table() -> PolicyTable {
    PolicyTable::new(
      vec![PolicyRule::new(
        UrlPattern::regex(r"\.(png|jpg)$").unwrap(),
        Strategy::CacheFirst,
        StoreClass::Images,
        Duration::from_millis(THIRTY_DAYS_MS),
      )],
      PolicyTable::default_rule(),
    )
  }

  fn layer(network: &Arc<FakeNetwork>) -> CacheLayer<MemoryStorage, FakeNetwork> {
    CacheLayer::new(
      Arc::new(MemoryStorage::new()),
      Arc::clone(network),
      images_table(),
      StoreNames::new("casa", "v1"),
    )
  }

  #[tokio::test]
  async fn test_non_get_passes_through_without_store_access() {
    let network = Arc::new(FakeNetwork::new());
    network.respond_text("https://casa.test/rest/v1/bookings", "created");
    let layer = layer(&network);

    let request = HttpRequest::new(Method::POST, url("https://casa.test/rest/v1/bookings"));
    let result = layer.handle(&request).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.text(), "created");
    assert!(layer.storage().store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_get_failure_propagates() {
    let network = Arc::new(FakeNetwork::new());
    network.set_offline(true);
    let layer = layer(&network);

    let request = HttpRequest::new(Method::DELETE, url("https://casa.test/rest/v1/bookings/1"));
    assert!(layer.handle(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_image_fetched_once_within_window() {
    let network = Arc::new(FakeNetwork::new());
    network.respond_text("https://casa.test/photo.jpg", "jpeg-bytes");
    let layer = layer(&network);
    let request = HttpRequest::get(url("https://casa.test/photo.jpg"));

    let first = layer.handle(&request).await.unwrap();
    let second = layer.handle(&request).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(network.calls(), 1);

    // Forcibly expire the entry
    let store = layer.names().name(StoreClass::Images);
    let mut entry = layer
      .storage()
      .match_entry(&store, &request.key())
      .unwrap()
      .unwrap();
    entry.captured_at = entry.captured_at - chrono::Duration::milliseconds(THIRTY_DAYS_MS as i64 + 1);
    layer
      .storage()
      .put_entry(&store, &request.key(), &entry)
      .unwrap();

    let third = layer.handle(&request).await.unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(network.calls(), 2);
  }

  #[tokio::test]
  async fn test_default_policy_uses_dynamic_store() {
    let network = Arc::new(FakeNetwork::new());
    network.respond_text("https://casa.test/dashboard", "hello");
    let layer = layer(&network);

    layer
      .handle(&HttpRequest::get(url("https://casa.test/dashboard")))
      .await
      .unwrap();

    assert_eq!(
      layer.storage().store_names().unwrap(),
      vec!["casa-dynamic-v1".to_string()]
    );
  }

  #[tokio::test]
  async fn test_broken_storage_never_fails_the_request() {
    let network = Arc::new(FakeNetwork::new());
    network.respond_text("https://casa.test/photo.png", "png");
    let layer = CacheLayer::new(
      Arc::new(FailingStorage),
      Arc::clone(&network),
      images_table(),
      StoreNames::new("casa", "v1"),
    );

    let request = HttpRequest::get(url("https://casa.test/photo.png"));
    let result = layer.handle(&request).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.text(), "png");

    network.set_offline(true);
    let result = layer.handle(&request).await.unwrap();
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.response.content_type(), Some("image/svg+xml"));
  }

  #[test]
  fn test_resolve_url() {
    let network = Arc::new(FakeNetwork::new());
    let layer = layer(&network);
    assert!(layer.resolve_url("/index.html").is_err());

    let layer = layer.with_origin(url("https://casa.test/app/"));
    assert_eq!(
      layer.resolve_url("/index.html").unwrap().as_str(),
      "https://casa.test/index.html"
    );
    assert_eq!(
      layer.resolve_url("https://cdn.test/a.js").unwrap().as_str(),
      "https://cdn.test/a.js"
    );
  }
}
