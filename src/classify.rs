//! Request classification: which caching strategy answers a URL.

use std::fmt;

use url::Url;

use crate::config::ClassifierConfig;

/// Category of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Scripts, styles, images. Answered cache-first.
  StaticAsset,
  /// Backend REST traffic. Answered network-first.
  ApiRequest,
  /// Documents and third-party requests. Answered stale-while-revalidate.
  Other,
}

impl fmt::Display for RequestClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::StaticAsset => "static-asset",
      Self::ApiRequest => "api-request",
      Self::Other => "other",
    })
  }
}

#[derive(Debug, Clone)]
pub struct Classifier {
  static_prefixes: Vec<String>,
  /// Lowercased, without the leading dot
  static_extensions: Vec<String>,
  api_host: String,
  api_prefix: String,
}

impl Classifier {
  pub fn new(config: &ClassifierConfig) -> Self {
    Self {
      static_prefixes: config.static_prefixes.clone(),
      static_extensions: config
        .static_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect(),
      api_host: config.api_host.to_lowercase(),
      api_prefix: config.api_prefix.clone(),
    }
  }

  /// Classify a URL. The static check runs first, so a URL that looks like
  /// both a static asset and an API call is a static asset.
  pub fn classify(&self, url: &Url) -> RequestClass {
    if self.is_static_asset(url) {
      RequestClass::StaticAsset
    } else if self.is_api_request(url) {
      RequestClass::ApiRequest
    } else {
      RequestClass::Other
    }
  }

  fn is_static_asset(&self, url: &Url) -> bool {
    let path = url.path();
    if self.static_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
      return true;
    }

    let file_name = path.rsplit('/').next().unwrap_or("");
    match file_name.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => {
        let ext = ext.to_lowercase();
        self.static_extensions.iter().any(|e| *e == ext)
      }
      _ => false,
    }
  }

  fn is_api_request(&self, url: &Url) -> bool {
    let host_matches = url
      .host_str()
      .map(|h| h.to_lowercase().contains(&self.api_host))
      .unwrap_or(false);

    host_matches && url.path().starts_with(self.api_prefix.as_str())
  }
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(&ClassifierConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify(url: &str) -> RequestClass {
    Classifier::default().classify(&Url::parse(url).unwrap())
  }

  #[test]
  fn static_prefixes() {
    assert_eq!(classify("https://app.example.com/assets/logo.png"), RequestClass::StaticAsset);
    assert_eq!(classify("https://app.example.com/icons/"), RequestClass::StaticAsset);
    assert_eq!(classify("https://app.example.com/svg/house"), RequestClass::StaticAsset);
  }

  #[test]
  fn static_extensions() {
    assert_eq!(classify("https://app.example.com/main.3f2a.js"), RequestClass::StaticAsset);
    assert_eq!(classify("https://app.example.com/styles.css?v=2"), RequestClass::StaticAsset);
    assert_eq!(classify("https://cdn.example.com/photo.JPEG"), RequestClass::StaticAsset);
    assert_eq!(classify("https://app.example.com/diagram.svg"), RequestClass::StaticAsset);
  }

  #[test]
  fn api_requests() {
    assert_eq!(
      classify("https://c1abc123.caspio.com/rest/v2/tables/Projects/records"),
      RequestClass::ApiRequest
    );
    assert_eq!(
      classify("https://c1abc123.caspio.com/rest/v2/tables/Services/records?q.where=ProjectID=4"),
      RequestClass::ApiRequest
    );
  }

  #[test]
  fn api_needs_host_and_prefix() {
    assert_eq!(classify("https://c1abc123.caspio.com/login"), RequestClass::Other);
    assert_eq!(classify("https://example.com/rest/v2/tables/Projects"), RequestClass::Other);
  }

  #[test]
  fn static_check_precedes_api_check() {
    assert_eq!(
      classify("https://c1abc123.caspio.com/rest/v2/files/photo.png"),
      RequestClass::StaticAsset
    );
  }

  #[test]
  fn everything_else_is_other() {
    assert_eq!(classify("https://app.example.com/"), RequestClass::Other);
    assert_eq!(classify("https://app.example.com/project/42"), RequestClass::Other);
    assert_eq!(classify("https://fonts.googleapis.com/css2"), RequestClass::Other);
    assert_eq!(classify("https://app.example.com/.js"), RequestClass::Other);
  }

  #[test]
  fn extensions_config_accepts_leading_dot() {
    let classifier = Classifier::new(&ClassifierConfig {
      static_prefixes: vec![],
      static_extensions: vec![".PDF".to_string()],
      ..ClassifierConfig::default()
    });
    let url = Url::parse("https://app.example.com/reports/final.pdf").unwrap();
    assert_eq!(classifier.classify(&url), RequestClass::StaticAsset);
  }
}
