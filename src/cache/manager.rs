//! Generation lifecycle and precache/runtime orchestration.
//!
//! The manager owns the two live generations: the precache (populated
//! all-or-nothing at install time from the manifest) and the runtime cache
//! (populated opportunistically by the strategies, bounded by an LRU cap).

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::store::{CacheStore, StoredResponse};
use crate::http::{Request, Response};

/// Cache manager over an injectable storage backend.
pub struct CacheManager<S: CacheStore> {
  store: Arc<S>,
  precache_name: String,
  runtime_name: String,
  runtime_cap: usize,
}

impl<S: CacheStore> CacheManager<S> {
  /// Create a manager for the given app name and version token.
  ///
  /// Generation names embed both, e.g. `notes-precache-v3`, so that a
  /// version bump makes the previous generations stale by name.
  pub fn new(store: S, app: &str, version: u32, runtime_cap: usize) -> Self {
    Self {
      store: Arc::new(store),
      precache_name: format!("{}-precache-v{}", app, version),
      runtime_name: format!("{}-runtime-v{}", app, version),
      runtime_cap,
    }
  }

  pub fn precache_name(&self) -> &str {
    &self.precache_name
  }

  pub fn runtime_name(&self) -> &str {
    &self.runtime_name
  }

  /// Direct access to the underlying store (status reporting).
  pub fn store(&self) -> &S {
    &self.store
  }

  /// Populate the precache from the manifest, all-or-nothing.
  ///
  /// Every entry is resolved against `origin`, fetched through the injected
  /// closure and stored. Any transport failure or non-success status aborts
  /// the install, and the partially-written precache generation is removed:
  /// an app shell that is only half cached must not look ready.
  pub async fn install<F, Fut>(&self, origin: &Url, manifest: &[String], fetch: F) -> Result<()>
  where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let urls: Vec<Url> = manifest
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
      })
      .collect::<Result<_>>()?;

    self.store.ensure_generation(&self.precache_name)?;

    // Fetch everything before storing anything, so a late failure leaves
    // less to clean up. The fetches run concurrently.
    let fetches = urls.iter().map(|url| {
      let request = Request::get(url.clone());
      let fut = fetch(request);
      async move {
        let response = fut
          .await
          .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Precache fetch for {} returned status {}",
            url,
            response.status
          ));
        }
        Ok::<_, color_eyre::Report>(response)
      }
    });

    let responses = match futures::future::try_join_all(fetches).await {
      Ok(responses) => responses,
      Err(e) => {
        self.discard_precache();
        return Err(e);
      }
    };

    for (url, response) in urls.iter().zip(&responses) {
      let key = Request::get(url.clone()).cache_key();
      if let Err(e) = self.store.put(&self.precache_name, &key, url.as_str(), response) {
        self.discard_precache();
        return Err(e);
      }
    }

    info!(
      generation = %self.precache_name,
      entries = manifest.len(),
      "precache populated"
    );
    Ok(())
  }

  fn discard_precache(&self) {
    if let Err(e) = self.store.delete_generation(&self.precache_name) {
      warn!("Failed to discard partial precache: {}", e);
    }
  }

  /// Delete every generation other than this version's two.
  ///
  /// Returns the number of generations removed. Must complete before the
  /// version starts serving requests.
  pub fn activate(&self) -> Result<usize> {
    self.store.ensure_generation(&self.runtime_name)?;

    let keep = [self.precache_name.as_str(), self.runtime_name.as_str()];
    let mut deleted = 0;
    for name in self.store.list_generations()? {
      if keep.contains(&name.as_str()) {
        continue;
      }
      self.store.delete_generation(&name)?;
      info!(generation = %name, "deleted stale cache generation");
      deleted += 1;
    }

    Ok(deleted)
  }

  /// Look up an entry across the live generations, precache first.
  pub fn lookup(&self, key: &str) -> Result<Option<StoredResponse>> {
    if let Some(hit) = self.store.get(&self.precache_name, key)? {
      return Ok(Some(hit));
    }
    self.store.get(&self.runtime_name, key)
  }

  /// Write an observed response into the runtime cache and trim it to the
  /// configured cap.
  ///
  /// Callers only pass success responses here; error responses must never
  /// land in the cache.
  pub fn store_runtime(&self, key: &str, url: &str, response: &Response) -> Result<()> {
    self.store.ensure_generation(&self.runtime_name)?;
    self.store.put(&self.runtime_name, key, url, response)?;

    let evicted = self.store.trim(&self.runtime_name, self.runtime_cap)?;
    if evicted > 0 {
      debug!(evicted, generation = %self.runtime_name, "trimmed runtime cache");
    }

    Ok(())
  }
}

impl<S: CacheStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      precache_name: self.precache_name.clone(),
      runtime_name: self.runtime_name.clone(),
      runtime_cap: self.runtime_cap,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::MemoryStore;

  fn origin() -> Url {
    Url::parse("https://example.com").unwrap()
  }

  fn ok_response(body: &[u8]) -> Response {
    Response {
      status: 200,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: body.to_vec(),
    }
  }

  fn manager() -> CacheManager<MemoryStore> {
    CacheManager::new(MemoryStore::new(), "notes", 1, 512)
  }

  #[tokio::test]
  async fn test_install_populates_every_manifest_entry() {
    let manager = manager();
    let manifest = vec!["/".to_string(), "/index.html".to_string()];

    manager
      .install(&origin(), &manifest, |req| async move {
        Ok(ok_response(req.url.path().as_bytes()))
      })
      .await
      .unwrap();

    for entry in &manifest {
      let key = Request::get(origin().join(entry).unwrap()).cache_key();
      let hit = manager.lookup(&key).unwrap();
      assert!(hit.is_some(), "manifest entry {} missing from precache", entry);
    }
  }

  #[tokio::test]
  async fn test_install_failure_leaves_no_partial_precache() {
    let manager = manager();
    let manifest = vec!["/".to_string(), "/broken.css".to_string()];

    let result = manager
      .install(&origin(), &manifest, |req| async move {
        if req.url.path() == "/broken.css" {
          Err(eyre!("connection refused"))
        } else {
          Ok(ok_response(b"shell"))
        }
      })
      .await;

    assert!(result.is_err());
    assert!(!manager
      .store()
      .list_generations()
      .unwrap()
      .contains(&"notes-precache-v1".to_string()));

    let key = Request::get(origin().join("/").unwrap()).cache_key();
    assert!(manager.lookup(&key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_statuses() {
    let manager = manager();
    let manifest = vec!["/missing.png".to_string()];

    let result = manager
      .install(&origin(), &manifest, |_req| async move {
        Ok(Response {
          status: 404,
          headers: Vec::new(),
          body: Vec::new(),
        })
      })
      .await;

    assert!(result.is_err());
    assert_eq!(manager.store().count("notes-precache-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_activate_purges_stale_generations() {
    let store = MemoryStore::new();
    store.ensure_generation("notes-precache-v1").unwrap();
    store.ensure_generation("notes-runtime-v1").unwrap();
    store
      .put("notes-runtime-v1", "k", "https://example.com/old", &ok_response(b"old"))
      .unwrap();

    let manager = CacheManager::new(store, "notes", 2, 512);
    manager
      .install(&origin(), &["/".to_string()], |_req| async move {
        Ok(ok_response(b"shell"))
      })
      .await
      .unwrap();

    let deleted = manager.activate().unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(
      manager.store().list_generations().unwrap(),
      vec!["notes-precache-v2".to_string(), "notes-runtime-v2".to_string()]
    );
  }

  #[tokio::test]
  async fn test_lookup_prefers_precache() {
    let manager = manager();
    manager
      .install(&origin(), &["/app.js".to_string()], |_req| async move {
        Ok(ok_response(b"precached"))
      })
      .await
      .unwrap();

    let key = Request::get(origin().join("/app.js").unwrap()).cache_key();
    manager
      .store_runtime(&key, "https://example.com/app.js", &ok_response(b"runtime"))
      .unwrap();

    let hit = manager.lookup(&key).unwrap().unwrap();
    assert_eq!(hit.response.body, b"precached");
  }

  #[tokio::test]
  async fn test_store_runtime_enforces_cap() {
    let store = MemoryStore::new();
    let manager = CacheManager::new(store, "notes", 1, 2);

    for i in 0..5 {
      let url = format!("https://example.com/{}", i);
      manager
        .store_runtime(&format!("k{}", i), &url, &ok_response(b"x"))
        .unwrap();
    }

    assert_eq!(manager.store().count("notes-runtime-v1").unwrap(), 2);
  }
}
