//! Version lifecycle (install warm-up, activate cleanup) and the control plane.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::layer::CacheLayer;
use super::request::{CachedEntry, HttpRequest};
use super::storage::{CacheStorage, StoreClass};
use crate::network::Network;

/// Outcome of the install phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  pub failed: Vec<String>,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  /// Pre-populate the static store with the precache list.
  ///
  /// Each asset is cached independently. A failing asset is logged and
  /// reported, and the install still completes.
  pub async fn install(&self) -> InstallReport {
    let store = self.names.name(StoreClass::Static);
    let outcomes = join_all(self.precache.iter().map(|url| self.cache_url(&store, url))).await;

    let mut report = InstallReport::default();
    for (url, outcome) in self.precache.iter().zip(outcomes) {
      match outcome {
        Ok(()) => report.cached += 1,
        Err(e) => {
          warn!(url = %url, error = %e, "Failed to precache asset");
          report.failed.push(url.to_string());
        }
      }
    }

    info!(
      store = %store,
      cached = report.cached,
      failed = report.failed.len(),
      "Install complete"
    );
    report
  }

  /// Delete every store of ours that doesn't belong to the current version.
  ///
  /// Returns the deleted store names. Running it again is a no-op.
  pub fn activate(&self) -> Vec<String> {
    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list stores during activation");
        return Vec::new();
      }
    };

    let mut deleted = Vec::new();
    for name in names.into_iter().filter(|n| self.names.is_orphan(n)) {
      match self.storage.delete_store(&name) {
        Ok(_) => {
          info!(store = %name, "Deleted orphaned store");
          deleted.push(name);
        }
        Err(e) => warn!(store = %name, error = %e, "Failed to delete orphaned store"),
      }
    }
    deleted
  }

  /// Best-effort bulk population of the dynamic store. Returns how many
  /// URLs were stored.
  pub async fn cache_urls(&self, urls: &[String]) -> usize {
    let store = self.names.name(StoreClass::Dynamic);
    let outcomes = join_all(urls.iter().map(|raw| {
      let store = store.as_str();
      async move {
        let url = self.resolve_url(raw)?;
        self.cache_url(store, &url).await
      }
    }))
    .await;

    let mut cached = 0;
    for (url, outcome) in urls.iter().zip(outcomes) {
      match outcome {
        Ok(()) => cached += 1,
        Err(e) => warn!(url = %url, error = %e, "Failed to cache URL"),
      }
    }
    cached
  }

  /// Delete every store, whatever its namespace or version.
  pub fn clear_all(&self) -> usize {
    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list stores");
        return 0;
      }
    };

    names
      .iter()
      .filter(|name| match self.storage.delete_store(name) {
        Ok(existed) => existed,
        Err(e) => {
          warn!(store = %name, error = %e, "Failed to delete store");
          false
        }
      })
      .count()
  }

  /// Total body bytes across every entry of every store.
  pub fn cache_size(&self) -> u64 {
    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list stores");
        return 0;
      }
    };

    names
      .iter()
      .map(|name| match self.storage.entries(name) {
        Ok(entries) => entries.iter().map(CachedEntry::size).sum::<u64>(),
        Err(e) => {
          warn!(store = %name, error = %e, "Failed to read store");
          0
        }
      })
      .sum()
  }

  async fn cache_url(&self, store: &str, url: &Url) -> Result<()> {
    let request = HttpRequest::get(url.clone());
    let response = self.network.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("Unexpected status {} for {}", response.status, url));
    }

    let entry = CachedEntry::capture(url, &response, Utc::now());
    self.storage.put_entry(store, &request.key(), &entry)
  }

  /// Handle one control-plane message, replying where the message expects it.
  pub async fn handle_message(
    &self,
    message: ControlMessage,
    reply: Option<oneshot::Sender<ControlReply>>,
  ) {
    match message {
      ControlMessage::CacheUrls { payload } => {
        let cached = self.cache_urls(&payload.urls).await;
        debug!(requested = payload.urls.len(), cached, "Handled CACHE_URLS");
      }
      ControlMessage::ClearCache => {
        let deleted = self.clear_all();
        info!(deleted, "Cleared all caches");
      }
      ControlMessage::GetCacheSize => {
        let size = self.cache_size();
        match reply {
          Some(tx) => {
            // Ignore send errors - requester may have gone away
            let _ = tx.send(ControlReply::CacheSize { size });
          }
          None => debug!(size, "GET_CACHE_SIZE without a reply channel"),
        }
      }
      ControlMessage::Unknown => warn!("Ignoring unknown control message"),
    }
  }
}

/// Administrative messages from the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  CacheUrls { payload: CacheUrlsPayload },
  ClearCache,
  GetCacheSize,
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUrlsPayload {
  #[serde(default)]
  pub urls: Vec<String>,
}

impl ControlMessage {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid control message: {}", e))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
  CacheSize { size: u64 },
}

struct Envelope {
  message: ControlMessage,
  reply: Option<oneshot::Sender<ControlReply>>,
}

/// Sender side of the control plane.
#[derive(Clone)]
pub struct ControlHandle {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl ControlHandle {
  /// Send without waiting for anything.
  #[cfg(test)]
  pub fn send(&self, message: ControlMessage) -> Result<()> {
    self
      .tx
      .send(Envelope {
        message,
        reply: None,
      })
      .map_err(|_| eyre!("Control plane has shut down"))
  }

  /// Send and wait until the message is handled.
  ///
  /// Returns the reply for messages that produce one, `None` otherwise.
  pub async fn request(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(Envelope {
        message,
        reply: Some(reply_tx),
      })
      .map_err(|_| eyre!("Control plane has shut down"))?;

    // A dropped sender means the message was handled without a reply
    Ok(reply_rx.await.ok())
  }
}

/// Spawn the control-plane loop. Messages are handled one at a time, in order.
pub fn spawn_control_plane<S: CacheStorage, N: Network>(
  layer: CacheLayer<S, N>,
) -> (ControlHandle, JoinHandle<()>) {
  let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

  let task = tokio::spawn(async move {
    while let Some(envelope) = rx.recv().await {
      layer
        .handle_message(envelope.message, envelope.reply)
        .await;
    }
    debug!("Control plane stopped");
  });

  (ControlHandle { tx }, task)
}
