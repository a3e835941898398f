//! The interception worker: lifecycle and per-class strategy execution.
//!
//! A worker goes through `install` (all-or-nothing precache), `activate`
//! (purge of stale generations) and only then serves `handle` calls. Each
//! handled request runs one strategy:
//!
//! - navigations: network-first, falling back to the cached shell, then to
//!   a synthesized offline page
//! - static assets: cache-first, caching network responses on the way out
//! - everything else (GET): network-first with the cache as a read-only
//!   fallback

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStore};
use crate::config::Config;
use crate::fallback;
use crate::http::{Request, Response};
use crate::net::Fetch;
use crate::strategy::{classify, Class};

/// Outcome of handing a request to the worker.
#[derive(Debug)]
pub enum Handled {
  /// The worker produced the response (network, cache or synthesized).
  Response(Response),
  /// Not intercepted; the caller performs its own pass-through.
  Decline,
}

/// Request interception worker for one app origin.
pub struct Worker<S: CacheStore, F: Fetch> {
  manager: CacheManager<S>,
  fetcher: Arc<F>,
  shell_url: Url,
  active: Arc<AtomicBool>,
}

impl<S: CacheStore + 'static, F: Fetch> Worker<S, F> {
  /// Install a new worker version: populate the precache from the manifest.
  ///
  /// Fails fatally if any manifest entry cannot be fetched; a worker that
  /// only half-cached its shell never becomes available.
  pub async fn install(config: &Config, store: S, fetcher: F) -> Result<Self> {
    let worker = Self::assemble(config, store, fetcher)?;

    let f = Arc::clone(&worker.fetcher);
    worker
      .manager
      .install(&config.origin, &config.precache, move |req| {
        let f = Arc::clone(&f);
        async move { f.fetch(&req).await }
      })
      .await?;

    Ok(worker)
  }

  /// Reattach to an already-installed version (process restart).
  ///
  /// The store is durable, so a precache populated by an earlier `install`
  /// keeps serving. Errors if this version was never installed.
  pub fn resume(config: &Config, store: S, fetcher: F) -> Result<Self> {
    let worker = Self::assemble(config, store, fetcher)?;

    let installed = worker
      .manager
      .store()
      .list_generations()?
      .iter()
      .any(|name| name == worker.manager.precache_name());
    if !installed {
      return Err(eyre!(
        "Version {} has no precache; run `satchel update` first",
        config.version
      ));
    }

    Ok(worker)
  }

  fn assemble(config: &Config, store: S, fetcher: F) -> Result<Self> {
    let manager = CacheManager::new(store, &config.app, config.version, config.runtime_cap);
    let shell_url = config
      .origin
      .join(&config.shell)
      .map_err(|e| eyre!("Invalid shell path '{}': {}", config.shell, e))?;

    Ok(Self {
      manager,
      fetcher: Arc::new(fetcher),
      shell_url,
      active: Arc::new(AtomicBool::new(false)),
    })
  }

  /// Purge generations left over from other versions and start serving.
  ///
  /// Returns the number of generations deleted. `handle` refuses requests
  /// until this has completed, so no request ever races the purge.
  pub fn activate(&self) -> Result<usize> {
    let deleted = self.manager.activate()?;
    self.active.store(true, Ordering::SeqCst);
    Ok(deleted)
  }

  pub fn manager(&self) -> &CacheManager<S> {
    &self.manager
  }

  /// Route one intercepted request through its strategy.
  ///
  /// Exactly one response comes back per request: network, cache or
  /// synthesized fallback, in that order of preference per class.
  pub async fn handle(&self, request: Request) -> Result<Handled> {
    if !self.active.load(Ordering::SeqCst) {
      return Err(eyre!("Worker is not active; call activate() first"));
    }

    let class = match classify(&request) {
      Some(class) => class,
      None => return Ok(Handled::Decline),
    };

    let response = match class {
      Class::Navigation => self.navigation(&request).await,
      Class::StaticAsset => self.static_asset(&request).await?,
      Class::Other => self.other(&request).await?,
    };

    Ok(Handled::Response(response))
  }

  /// Network-first for page loads. Never fails: offline navigations get the
  /// cached shell, or the synthesized offline page as last resort.
  async fn navigation(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_detached(request, &response);
        }
        response
      }
      Err(e) => {
        debug!("Navigation fetch for {} failed: {}", request.url, e);
        let shell_key = Request::get(self.shell_url.clone()).cache_key();
        match self.manager.lookup(&shell_key) {
          Ok(Some(hit)) => hit.response,
          Ok(None) => fallback::offline_response(),
          Err(lookup_err) => {
            warn!("Shell lookup failed: {}", lookup_err);
            fallback::offline_response()
          }
        }
      }
    }
  }

  /// Cache-first for static sub-resources. A miss with no network
  /// propagates: a fabricated image or script would corrupt the page.
  async fn static_asset(&self, request: &Request) -> Result<Response> {
    let key = request.cache_key();
    match self.manager.lookup(&key) {
      Ok(Some(hit)) => return Ok(hit.response),
      Ok(None) => {}
      Err(e) => warn!("Cache lookup for {} failed: {}", request.url, e),
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_success() {
      self.store_detached(request, &response);
    }
    Ok(response)
  }

  /// Network-first for everything else. Responses are returned without
  /// being stored; the cache only serves as a read-only fallback here.
  async fn other(&self, request: &Request) -> Result<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        let key = request.cache_key();
        match self.manager.lookup(&key) {
          Ok(Some(hit)) => {
            debug!("Serving {} from cache after network failure", request.url);
            Ok(hit.response)
          }
          Ok(None) => Err(e),
          Err(lookup_err) => {
            warn!("Cache lookup for {} failed: {}", request.url, lookup_err);
            Err(e)
          }
        }
      }
    }
  }

  /// Write a response copy into the runtime cache without holding up the
  /// caller. The task runs to completion even if the caller is gone; a
  /// failed write is logged and otherwise ignored.
  fn store_detached(&self, request: &Request, response: &Response) {
    let manager = self.manager.clone();
    let key = request.cache_key();
    let url = request.url.to_string();
    let response = response.clone();

    tokio::spawn(async move {
      if let Err(e) = manager.store_runtime(&key, &url, &response) {
        warn!("Failed to cache response for {}: {}", url, e);
      }
    });
  }
}

impl<S: CacheStore, F: Fetch> Clone for Worker<S, F> {
  fn clone(&self) -> Self {
    Self {
      manager: self.manager.clone(),
      fetcher: Arc::clone(&self.fetcher),
      shell_url: self.shell_url.clone(),
      active: Arc::clone(&self.active),
    }
  }
}
