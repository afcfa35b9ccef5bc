//! Cache layer that orchestrates caching strategies with network fetching.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheKey, CacheResult, CachedEntry};
use crate::config::CacheVersion;
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};

/// Cache layer that answers requests from the current cache generation and
/// the network.
///
/// Storage failures never fail a request: a failed read is a miss and a
/// failed write is logged, so the layer degrades to network-only.
pub struct CacheLayer<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
}

impl<S: CacheStorage + 'static, F: Fetcher> CacheLayer<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, version: &CacheVersion) -> Self {
    Self {
      storage,
      fetcher,
      generation: version.name(),
    }
  }

  /// Name of the generation reads and writes go to.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn fetcher(&self) -> &Arc<F> {
    &self.fetcher
  }

  /// Cache-first, used for static assets.
  ///
  /// 1. Check cache - if present, return without touching the network
  /// 2. Otherwise fetch; store 2xx responses
  /// 3. Network errors propagate, there is no placeholder
  pub async fn cache_first(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    let key = CacheKey::for_request(request);

    if let Some(cached) = self.lookup(&key) {
      debug!(key = %key.description(), "cache-first hit");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_success() {
      self.store(&key, &response);
    }

    debug!(key = %key.description(), status = response.status, "cache-first miss");
    Ok(CacheResult::from_network(response))
  }

  /// Network-first, used for backend API calls.
  ///
  /// 1. Fetch; store and return 2xx, return anything else uncached
  /// 2. On network failure, return the cached entry (offline mode)
  /// 3. With nothing cached, answer with the synthetic 503 offline response
  pub async fn network_first(&self, request: &Request) -> CacheResult<Response> {
    let key = CacheKey::for_request(request);

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&key, &response);
        }
        CacheResult::from_network(response)
      }
      Err(err) => {
        debug!(key = %key.description(), error = %err, "network-first fetch failed");

        match self.lookup(&key) {
          Some(cached) => CacheResult::offline(cached.response, cached.cached_at),
          None => CacheResult::offline_fallback(Response::offline()),
        }
      }
    }
  }

  /// Stale-while-revalidate, used for everything else.
  ///
  /// A background fetch always starts and overwrites the entry on success.
  /// The caller gets the cached entry when there is one, otherwise the
  /// result of that fetch.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
  ) -> Result<CacheResult<Response>, FetchError> {
    let key = CacheKey::for_request(request);
    let cached = self.lookup(&key);

    let refresh = tokio::spawn(Self::revalidate(
      Arc::clone(&self.storage),
      Arc::clone(&self.fetcher),
      self.generation.clone(),
      key.clone(),
      request.clone(),
    ));

    if let Some(cached) = cached {
      debug!(key = %key.description(), "serving stale entry, revalidating");
      // Detached; its only effect is the cache write
      drop(refresh);
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match refresh.await {
      Ok(result) => result.map(CacheResult::from_network),
      Err(_) => Err(FetchError::Aborted),
    }
  }

  async fn revalidate(
    storage: Arc<S>,
    fetcher: Arc<F>,
    generation: String,
    key: CacheKey,
    request: Request,
  ) -> Result<Response, FetchError> {
    let response = match fetcher.fetch(&request).await {
      Ok(response) => response,
      Err(err) => {
        debug!(key = %key.description(), error = %err, "revalidation fetch failed");
        return Err(err);
      }
    };

    if response.is_success() {
      if let Err(err) = storage.put(&generation, &key, &response) {
        warn!(key = %key.description(), error = %err, "failed to refresh cache entry");
      }
    }

    Ok(response)
  }

  fn lookup(&self, key: &CacheKey) -> Option<CachedEntry> {
    match self.storage.get(&self.generation, key) {
      Ok(entry) => entry,
      Err(err) => {
        warn!(key = %key.description(), error = %err, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, key: &CacheKey, response: &Response) {
    if let Err(err) = self.storage.put(&self.generation, key, response) {
      warn!(key = %key.description(), error = %err, "cache write failed");
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheLayer<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      generation: self.generation.clone(),
    }
  }
}
