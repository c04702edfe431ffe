//! Request, response and cached entry types shared by the cache and the network.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Header stamped on every captured response.
pub const CAPTURED_AT_HEADER: &str = "x-cache-captured-at";

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl HttpRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn accept(&self) -> &str {
    self.header("accept").unwrap_or("")
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A response from the network, the cache, or the offline synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Identity of a request within a single store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  readable: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      readable: format!("{} {}", method.as_str(), url),
    }
  }

  /// Human-readable form, e.g. `GET https://host/path`.
  pub fn as_str(&self) -> &str {
    &self.readable
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.readable.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.readable)
  }
}

/// A captured response held in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub captured_at: DateTime<Utc>,
}

impl CachedEntry {
  /// Capture a response, stamping the capture time into its headers.
  pub fn capture(url: &Url, response: &HttpResponse, now: DateTime<Utc>) -> Self {
    let mut headers: Vec<(String, String)> = response
      .headers
      .iter()
      .filter(|(k, _)| !k.eq_ignore_ascii_case(CAPTURED_AT_HEADER))
      .cloned()
      .collect();
    headers.push((
      CAPTURED_AT_HEADER.to_string(),
      now.to_rfc3339_opts(SecondsFormat::Millis, true),
    ));

    Self {
      url: url.to_string(),
      status: response.status,
      headers,
      body: response.body.clone(),
      captured_at: now,
    }
  }

  /// Whether the entry is still inside its freshness window at `now`.
  pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
    let age = now - self.captured_at;
    match chrono::Duration::from_std(max_age) {
      Ok(max_age) => age < max_age,
      // Larger than chrono can represent: never expires.
      Err(_) => true,
    }
  }

  pub fn size(&self) -> u64 {
    self.body.len() as u64
  }

  pub fn into_response(self) -> HttpResponse {
    HttpResponse {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_ignores_fragment() {
    let a = RequestKey::new(&Method::GET, &url("https://casa.test/properties#top"));
    let b = RequestKey::new(&Method::GET, &url("https://casa.test/properties"));
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "GET https://casa.test/properties");
  }

  #[test]
  fn test_key_distinguishes_query_and_method() {
    let a = RequestKey::new(&Method::GET, &url("https://casa.test/p?page=1"));
    let b = RequestKey::new(&Method::GET, &url("https://casa.test/p?page=2"));
    let c = RequestKey::new(&Method::HEAD, &url("https://casa.test/p?page=1"));
    assert_ne!(a.digest(), b.digest());
    assert_ne!(a.digest(), c.digest());
    assert_eq!(a.digest().len(), 64);
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let req = HttpRequest::get(url("https://casa.test/")).with_header("Accept", "text/html");
    assert_eq!(req.accept(), "text/html");
    assert_eq!(req.header("ACCEPT"), Some("text/html"));
  }

  #[test]
  fn test_capture_stamps_timestamp_once() {
    let now = Utc::now();
    let mut response = HttpResponse::new(200, "text/plain", "hello");
    response
      .headers
      .push((CAPTURED_AT_HEADER.to_string(), "old".to_string()));

    let entry = CachedEntry::capture(&url("https://casa.test/a"), &response, now);
    let stamps: Vec<_> = entry
      .headers
      .iter()
      .filter(|(k, _)| k == CAPTURED_AT_HEADER)
      .collect();
    assert_eq!(stamps.len(), 1);
    assert_ne!(stamps[0].1, "old");
    assert_eq!(entry.size(), 5);
  }

  #[test]
  fn test_freshness_window() {
    let now = Utc::now();
    let entry = CachedEntry::capture(
      &url("https://casa.test/a"),
      &HttpResponse::new(200, "text/plain", "x"),
      now - chrono::Duration::seconds(59),
    );
    assert!(entry.is_fresh(Duration::from_secs(60), now));
    assert!(!entry.is_fresh(Duration::from_secs(59), now));
    assert!(!entry.is_fresh(Duration::from_secs(30), now));
  }
}
