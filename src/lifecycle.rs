//! Install and activate transitions for cache generations.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheKey, CacheStorage};
use crate::config::{CacheVersion, LifecycleConfig};
use crate::fetch::Fetcher;
use crate::http::{Request, Response};

/// Where a lifecycle is in its install/activate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this generation will never activate
  Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
  pub generation: String,
  /// Number of manifest entries stored
  pub cached: usize,
  /// Take over without waiting for existing sessions to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
  pub generation: String,
  /// Generations that were purged
  pub deleted: Vec<String>,
  /// Open sessions are served by this generation without a reload
  pub clients_claimed: bool,
}

/// Seeds the current generation on install and purges the others on
/// activate.
pub struct Lifecycle<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  version: CacheVersion,
  origin: Url,
  manifest: Vec<String>,
  state: LifecycleState,
}

impl<S: CacheStorage, F: Fetcher> Lifecycle<S, F> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<F>,
    version: CacheVersion,
    config: &LifecycleConfig,
  ) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid lifecycle origin '{}': {}", config.origin, e))?;

    Ok(Self {
      storage,
      fetcher,
      version,
      origin,
      manifest: config.manifest.clone(),
      state: LifecycleState::Parsed,
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Fetch every manifest path and store them all in one transaction.
  ///
  /// All-or-nothing: a single fetch error or non-2xx response fails the
  /// install and leaves no trace of the generation in storage.
  pub async fn install(&mut self) -> Result<InstallOutcome> {
    if self.state != LifecycleState::Parsed {
      return Err(eyre!("Cannot install from state {:?}", self.state));
    }
    self.state = LifecycleState::Installing;

    let generation = self.version.name();
    info!(%generation, assets = self.manifest.len(), "installing");

    match self.precache().await {
      Ok(entries) => {
        if let Err(err) = self.storage.put_all(&generation, &entries) {
          self.state = LifecycleState::Redundant;
          return Err(err);
        }

        self.state = LifecycleState::Installed;
        info!(%generation, cached = entries.len(), "installed");

        Ok(InstallOutcome {
          generation,
          cached: entries.len(),
          skip_waiting: true,
        })
      }
      Err(err) => {
        self.state = LifecycleState::Redundant;
        warn!(%generation, error = %err, "install failed");
        Err(err)
      }
    }
  }

  async fn precache(&self) -> Result<Vec<(CacheKey, Response)>> {
    let requests = self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(|url| Request::new(reqwest::Method::GET, url))
          .map_err(|e| eyre!("Invalid manifest path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let fetches = requests.iter().map(|request| async move {
      let response = self
        .fetcher
        .fetch(request)
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Failed to fetch {}: status {}",
          request.url,
          response.status
        ));
      }

      Ok::<_, color_eyre::Report>((CacheKey::for_request(request), response))
    });

    try_join_all(fetches).await
  }

  /// Delete every generation except the current one, then claim clients.
  ///
  /// Allowed after a successful install in this lifecycle, or when the
  /// current generation was installed earlier and is already in storage.
  /// A storage error leaves the state as it was, so activate can be retried.
  pub async fn activate(&mut self) -> Result<ActivateOutcome> {
    let generation = self.version.name();

    match self.state {
      LifecycleState::Installed => {}
      LifecycleState::Parsed => {
        if !self.storage.generations()?.contains(&generation) {
          return Err(eyre!("Generation {} is not installed", generation));
        }
      }
      state => return Err(eyre!("Cannot activate from state {:?}", state)),
    }
    let previous = self.state;
    self.state = LifecycleState::Activating;

    // Generations already deleted stay deleted; a retry purges the rest
    let deleted = match self.purge(&generation) {
      Ok(deleted) => deleted,
      Err(err) => {
        self.state = previous;
        warn!(%generation, error = %err, "activate failed");
        return Err(err);
      }
    };

    self.state = LifecycleState::Activated;
    info!(%generation, deleted = deleted.len(), "activated");

    Ok(ActivateOutcome {
      generation,
      deleted,
      clients_claimed: true,
    })
  }

  fn purge(&self, keep: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.generations()? {
      if name == keep {
        continue;
      }
      if self.storage.delete_generation(&name)? {
        info!(generation = %name, "deleted old cache generation");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}
