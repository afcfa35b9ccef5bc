//! Core types for the caching system.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};

use crate::http::{Request, Response};

/// Identity of a cached request: method plus full URL.
///
/// The query string is part of the identity; the fragment is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: Method,
  pub url: String,
}

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    Self {
      method: request.method.clone(),
      url: url.to_string(),
    }
  }

  /// Human readable form, e.g. `GET https://host/path?q=1`.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// SHA256 of the description, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response with its write time.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data served without consulting the network first.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Cached data served because the network failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Synthetic answer: network failed and nothing was cached.
  pub fn offline_fallback(data: T) -> Self {
    Self {
      data,
      source: CacheSource::OfflineFallback,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Network unavailable, nothing cached
  OfflineFallback,
  /// Request was not intercepted and went straight to the network
  Bypass,
}
