use color_eyre::{eyre::eyre, Result};
use serde::{de, Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub classifier: ClassifierConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

/// Cache generation identity, e.g. `noble-inspector-v1.2.0`.
///
/// Bumping `version` starts a new generation; activating it purges every
/// other one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheVersion {
  pub prefix: String,
  /// Quoted or an integer; `version: 2` reads as "2"
  #[serde(deserialize_with = "version_scalar")]
  pub version: String,
}

fn version_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Scalar {
    Text(String),
    Integer(u64),
    Decimal(f64),
  }

  match Scalar::deserialize(deserializer)? {
    Scalar::Text(text) => Ok(text),
    Scalar::Integer(n) => Ok(n.to_string()),
    // 1.0 and 1.10 would silently become "1" and "1.1"
    Scalar::Decimal(n) => Err(de::Error::custom(format!(
      "cache version must be quoted, e.g. version: \"1.0.0\" (found {})",
      n
    ))),
  }
}

impl CacheVersion {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  /// Store name of this generation.
  pub fn name(&self) -> String {
    format!("{}-v{}", self.prefix, self.version)
  }

  pub fn validate(&self) -> Result<()> {
    if self.prefix.trim().is_empty() {
      return Err(eyre!("Cache prefix must not be empty"));
    }
    if self.version.trim().is_empty() {
      return Err(eyre!(
        "Cache version must not be empty (generation would be '{}')",
        self.name()
      ));
    }
    Ok(())
  }
}

impl Default for CacheVersion {
  fn default() -> Self {
    Self::new("noble-inspector", "1.0.0")
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name())
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  #[serde(flatten)]
  pub version: CacheVersion,
  /// Database file (default: $XDG_DATA_HOME/fieldcache/cache.db)
  pub path: Option<PathBuf>,
  /// When false nothing is stored and every lookup misses
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: CacheVersion::default(),
      path: None,
      enabled: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  /// Path prefixes served as static assets
  pub static_prefixes: Vec<String>,
  /// File extensions (without the dot) served as static assets
  pub static_extensions: Vec<String>,
  /// Substring matched against the request hostname for backend traffic
  pub api_host: String,
  /// Versioned REST prefix on the backend
  pub api_prefix: String,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      static_prefixes: ["/assets/", "/icons/", "/svg/"]
        .into_iter()
        .map(String::from)
        .collect(),
      static_extensions: [
        "js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      api_host: "caspio.com".to_string(),
      api_prefix: "/rest/v2/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Origin the manifest paths are resolved against
  pub origin: String,
  /// Paths pre-cached on install, in order
  pub manifest: Vec<String>,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8100".to_string(),
      manifest: ["/", "/assets/", "/icons/", "/svg/", "/manifest.json"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Per-request timeout. Unset means requests may wait indefinitely.
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub tag: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "background-sync".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Opened when a notification is clicked
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Noble Property Inspections".to_string(),
      default_body: "New update available".to_string(),
      icon: "/assets/icon/icon-192x192.png".to_string(),
      badge: "/assets/icon/badge-72x72.png".to_string(),
      open_url: "/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldcache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.cache.version.validate()?;
    Ok(config)
  }

  /// Directory for the cache database and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldcache"))
  }

  /// Database path, from config or the default location.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }
}
