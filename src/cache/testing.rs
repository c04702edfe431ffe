//! Test doubles for the network and storage capabilities.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

use super::request::{CachedEntry, HttpRequest, HttpResponse, RequestKey};
use super::storage::CacheStorage;
use crate::network::Network;

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

fn normalize(s: &str) -> String {
  Url::parse(s).map(|u| u.to_string()).unwrap_or_else(|_| s.to_string())
}

/// Scripted network that records every fetch.
#[derive(Default)]
pub struct FakeNetwork {
  responses: Mutex<HashMap<String, HttpResponse>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
  gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: HttpResponse) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(normalize(url), response);
  }

  pub fn respond_text(&self, url: &str, body: &str) {
    self.respond(url, HttpResponse::new(200, "text/plain", body));
  }

  /// Make fetches of one URL fail at the transport level.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(normalize(url));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Hold every subsequent fetch until a permit is added to the returned semaphore.
  pub fn hold(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    let url = normalize(url);
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| **c == url)
      .count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate
        .acquire()
        .await
        .map_err(|e| eyre!("gate closed: {}", e))?
        .forget();
    }

    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
      return Err(eyre!("network unreachable: {}", url));
    }

    let response = self.responses.lock().unwrap().get(&url).cloned();
    Ok(response.unwrap_or_else(|| HttpResponse::new(404, "text/plain", "Not Found")))
  }
}

/// Storage where every operation fails.
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn match_entry(&self, _store: &str, _key: &RequestKey) -> Result<Option<CachedEntry>> {
    Err(eyre!("storage unavailable"))
  }

  fn put_entry(&self, _store: &str, _key: &RequestKey, _entry: &CachedEntry) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn entries(&self, _store: &str) -> Result<Vec<CachedEntry>> {
    Err(eyre!("storage unavailable"))
  }

  fn store_names(&self) -> Result<Vec<String>> {
    Err(eyre!("storage unavailable"))
  }

  fn delete_store(&self, _store: &str) -> Result<bool> {
    Err(eyre!("storage unavailable"))
  }
}
