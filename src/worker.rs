//! Request interception: classify a request and answer it with the
//! matching caching strategy.

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};

use crate::cache::{CacheLayer, CacheResult, CacheSource, CacheStorage};
use crate::classify::{Classifier, RequestClass};
use crate::config::{CacheVersion, ClassifierConfig};
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};

/// Outcome of warming a set of URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
  pub warmed: usize,
  /// URL and reason for each URL that could not be warmed
  pub failed: Vec<(String, String)>,
}

/// The interception interface.
///
/// Only GET requests over http(s) are intercepted; everything else goes to
/// the network untouched and never reaches the cache.
pub struct ServiceWorker<S: CacheStorage, F: Fetcher> {
  classifier: Classifier,
  layer: CacheLayer<S, F>,
}

impl<S: CacheStorage + 'static, F: Fetcher> ServiceWorker<S, F> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<F>,
    version: &CacheVersion,
    classifier: &ClassifierConfig,
  ) -> Self {
    Self {
      classifier: Classifier::new(classifier),
      layer: CacheLayer::new(storage, fetcher, version),
    }
  }

  pub fn layer(&self) -> &CacheLayer<S, F> {
    &self.layer
  }

  pub fn should_intercept(&self, request: &Request) -> bool {
    request.method == Method::GET && request.is_http()
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    self.classifier.classify(&request.url)
  }

  /// Answer `request` with the strategy for `class`.
  pub async fn handle(
    &self,
    request: &Request,
    class: RequestClass,
  ) -> Result<CacheResult<Response>, FetchError> {
    if !self.should_intercept(request) {
      return self.bypass(request).await;
    }

    debug!(method = %request.method, url = %request.url, %class, "intercepted");
    match class {
      RequestClass::StaticAsset => self.layer.cache_first(request).await,
      RequestClass::ApiRequest => Ok(self.layer.network_first(request).await),
      RequestClass::Other => self.layer.stale_while_revalidate(request).await,
    }
  }

  /// `Ok(None)` when the request is not intercepted.
  pub async fn intercept(
    &self,
    request: &Request,
  ) -> Result<Option<CacheResult<Response>>, FetchError> {
    if !self.should_intercept(request) {
      return Ok(None);
    }

    let class = self.classify(request);
    self.handle(request, class).await.map(Some)
  }

  /// Intercept when applicable, otherwise send straight to the network.
  pub async fn respond(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    match self.intercept(request).await? {
      Some(result) => Ok(result),
      None => self.bypass(request).await,
    }
  }

  async fn bypass(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    let response = self.layer.fetcher().fetch(request).await?;
    Ok(CacheResult {
      data: response,
      source: CacheSource::Bypass,
      cached_at: None,
    })
  }

  /// Pull URLs through the normal interception path so they are available
  /// offline. A failing URL does not stop the rest.
  pub async fn warm(&self, urls: &[String]) -> WarmReport {
    let mut report = WarmReport::default();

    for url in urls {
      let request = match Request::get(url) {
        Ok(request) => request,
        Err(err) => {
          report.failed.push((url.clone(), err.to_string()));
          continue;
        }
      };

      match self.respond(&request).await {
        Ok(result) if result.data.is_success() => report.warmed += 1,
        Ok(result) => {
          report
            .failed
            .push((url.clone(), format!("status {}", result.data.status)));
        }
        Err(err) => report.failed.push((url.clone(), err.to_string())),
      }
    }

    if !report.failed.is_empty() {
      warn!(failed = report.failed.len(), "some URLs could not be warmed");
    }

    report
  }
}

#[cfg(test)]
mod tests {
  use url::Url;

  use super::*;
  use crate::cache::{CacheKey, SqliteStorage};
  use crate::fetch::testing::ScriptedFetcher;

  const LOGO: &str = "https://app.example.com/assets/logo.png";
  const PROJECTS: &str = "https://c1abc123.caspio.com/rest/v2/tables/Projects/records";
  const HOME: &str = "https://app.example.com/";

  fn worker(fetcher: ScriptedFetcher) -> ServiceWorker<SqliteStorage, ScriptedFetcher> {
    ServiceWorker::new(
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      Arc::new(fetcher),
      &CacheVersion::new("inspector", "1.0.0"),
      &ClassifierConfig::default(),
    )
  }

  fn is_cached(worker: &ServiceWorker<SqliteStorage, ScriptedFetcher>, url: &str) -> bool {
    let key = CacheKey::for_request(&Request::get(url).unwrap());
    worker
      .layer()
      .storage()
      .get(worker.layer().generation(), &key)
      .unwrap()
      .is_some()
  }

  #[tokio::test]
  async fn logo_is_served_and_cached() {
    let worker = worker(ScriptedFetcher::new().route(LOGO, Response::new(200, vec![1, 2, 3])));
    let request = Request::get(LOGO).unwrap();

    assert_eq!(worker.classify(&request), RequestClass::StaticAsset);
    let result = worker.intercept(&request).await.unwrap().unwrap();

    assert_eq!(result.data.status, 200);
    assert!(is_cached(&worker, LOGO));
  }

  #[tokio::test]
  async fn api_online_then_offline() {
    let body = r#"{"Result":[{"PK_ID":1,"Address":"12 Main St"}]}"#;
    let worker = worker(ScriptedFetcher::new().route(PROJECTS, Response::new(200, body)));
    let request = Request::get(PROJECTS).unwrap();

    let online = worker.intercept(&request).await.unwrap().unwrap();
    assert_eq!(online.source, CacheSource::Network);
    assert_eq!(online.data.body, body.as_bytes());

    worker.layer().fetcher().set_offline(true);
    let offline = worker.intercept(&request).await.unwrap().unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data.body, body.as_bytes());
  }

  #[tokio::test]
  async fn api_offline_with_empty_cache() {
    let fetcher = ScriptedFetcher::new();
    fetcher.set_offline(true);
    let worker = worker(fetcher);

    let result = worker
      .intercept(&Request::get(PROJECTS).unwrap())
      .await
      .unwrap()
      .unwrap();

    assert!(result.data.is_offline_fallback());
    assert_eq!(result.data.json().unwrap()["error"], "Offline");
  }

  #[tokio::test]
  async fn non_get_is_not_intercepted() {
    let worker = worker(ScriptedFetcher::new());
    let post = Request::new(Method::POST, Url::parse(PROJECTS).unwrap()).with_body("{}");

    assert!(!worker.should_intercept(&post));
    assert!(worker.intercept(&post).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn intercept_surfaces_fetch_errors() {
    let fetcher = ScriptedFetcher::new();
    fetcher.set_offline(true);
    let worker = worker(fetcher);

    let err = worker
      .intercept(&Request::get(LOGO).unwrap())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn bypass_never_touches_cache() {
    let worker = worker(ScriptedFetcher::new().route(LOGO, Response::new(200, "img")));
    let put = Request::new(Method::PUT, Url::parse(LOGO).unwrap());

    let result = worker.respond(&put).await.unwrap();
    assert_eq!(result.source, CacheSource::Bypass);

    // handle() called directly with a non-GET also bypasses
    let result = worker.handle(&put, RequestClass::StaticAsset).await.unwrap();
    assert_eq!(result.source, CacheSource::Bypass);
    assert!(!is_cached(&worker, LOGO));
  }

  #[tokio::test]
  async fn non_http_scheme_is_not_intercepted() {
    let worker = worker(ScriptedFetcher::new());
    let request = Request::get("chrome-extension://abcdef/content.js").unwrap();
    assert!(worker.intercept(&request).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn warm_counts_successes_and_failures() {
    let worker = worker(
      ScriptedFetcher::new()
        .route(PROJECTS, Response::new(200, "[]"))
        .route(LOGO, Response::new(200, "img"))
        .route(HOME, Response::new(500, "oops")),
    );
    let urls = vec![
      PROJECTS.to_string(),
      LOGO.to_string(),
      HOME.to_string(),
      "not a url".to_string(),
    ];

    let report = worker.warm(&urls).await;

    assert_eq!(report.warmed, 2);
    assert_eq!(report.failed.len(), 2);
    assert!(is_cached(&worker, PROJECTS));
    assert!(is_cached(&worker, LOGO));
  }
}
