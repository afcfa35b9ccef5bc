use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use fieldcache::cache::{CacheStorage, NoopStorage, SqliteStorage};
use fieldcache::config::Config;
use fieldcache::fetch::HttpFetcher;
use fieldcache::http::Request;
use fieldcache::lifecycle::Lifecycle;
use fieldcache::sync::{MemoryQueue, MutationQueue, QueueFlush, SyncRegistry};
use fieldcache::worker::ServiceWorker;
use fieldcache::{logging, notify};

#[derive(Parser, Debug)]
#[command(name = "fieldcache")]
#[command(about = "Offline request cache and sync for field inspection clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static manifest into the current generation
  Install,
  /// Purge every generation but the current one
  Activate,
  /// Answer a request through the cache
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// Pull URLs into the cache ahead of going offline
  Warm { urls: Vec<String> },
  /// Fire a background sync tag
  Sync {
    #[arg(long)]
    tag: Option<String>,
    /// JSON file with queued mutations to replay
    #[arg(long)]
    queue: Option<PathBuf>,
  },
  /// List cache generations
  Status,
  /// Render a push payload as a notification
  Push { text: Option<String> },
}

/// One queued mutation in a `--queue` file.
#[derive(Debug, Deserialize)]
struct QueuedMutation {
  method: String,
  url: String,
  #[serde(default)]
  body: Option<serde_json::Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&Config::data_dir()?.join("logs"))?;

  if config.cache.enabled {
    let storage = SqliteStorage::open(&config.database_path()?)?;
    run(Arc::new(storage), &config, args.command).await
  } else {
    run(Arc::new(NoopStorage), &config, args.command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  storage: Arc<S>,
  config: &Config,
  command: Command,
) -> Result<()> {
  let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
  let version = config.cache.version.clone();

  match command {
    Command::Install => {
      let mut lifecycle = Lifecycle::new(storage, fetcher, version, &config.lifecycle)?;
      let outcome = lifecycle.install().await?;
      println!("installed {} ({} entries)", outcome.generation, outcome.cached);
    }
    Command::Activate => {
      let mut lifecycle = Lifecycle::new(storage, fetcher, version, &config.lifecycle)?;
      let outcome = lifecycle.activate().await?;
      println!("activated {}", outcome.generation);
      for name in outcome.deleted {
        println!("deleted {}", name);
      }
    }
    Command::Fetch { url, method } => {
      let worker = ServiceWorker::new(storage, fetcher, &version, &config.classifier);
      let method = method
        .to_uppercase()
        .parse::<Method>()
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let request = Request::new(method, url);

      let class = worker.classify(&request);
      let result = worker.respond(&request).await?;
      eprintln!(
        "{} {} ({}, {:?})",
        result.data.status, request.url, class, result.source
      );
      println!("{}", String::from_utf8_lossy(&result.data.body));
    }
    Command::Warm { urls } => {
      let worker = ServiceWorker::new(storage, fetcher, &version, &config.classifier);
      let report = worker.warm(&urls).await;
      println!("warmed {}", report.warmed);
      for (url, reason) in &report.failed {
        println!("failed {}: {}", url, reason);
      }
    }
    Command::Sync { tag, queue } => {
      let mutations = MemoryQueue::new();
      if let Some(path) = queue {
        for mutation in load_queue(&path)? {
          mutations.push(mutation)?;
        }
      }
      let mutations: Arc<dyn MutationQueue> = Arc::new(mutations);

      let registry = SyncRegistry::new();
      registry.register(
        config.sync.tag.clone(),
        Arc::new(QueueFlush::new(Arc::clone(&mutations), fetcher)),
      )?;

      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      match registry.fire(&tag).await? {
        Some(report) => println!(
          "replayed {}, rejected {}, requeued {}",
          report.replayed, report.rejected, report.requeued
        ),
        None => println!("no handler registered for tag {}", tag),
      }
    }
    Command::Status => {
      let current = version.name();
      for name in storage.generations()? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, storage.entry_count(&name)?);
      }
    }
    Command::Push { text } => {
      let notification = notify::on_push(text.as_deref(), &config.notifications);
      println!("{}: {}", notification.title, notification.body);
    }
  }

  Ok(())
}

fn load_queue(path: &Path) -> Result<Vec<Request>> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read queue file {}: {}", path.display(), e))?;
  let queued: Vec<QueuedMutation> = serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse queue file {}: {}", path.display(), e))?;

  queued
    .into_iter()
    .map(|m| {
      let method = m
        .method
        .to_uppercase()
        .parse::<Method>()
        .map_err(|e| eyre!("Invalid method '{}': {}", m.method, e))?;
      let url = Url::parse(&m.url).map_err(|e| eyre!("Invalid URL '{}': {}", m.url, e))?;

      let mut request = Request::new(method, url);
      if let Some(body) = m.body {
        request = request
          .with_header("Content-Type", "application/json")
          .with_body(body.to_string());
      }
      Ok::<_, color_eyre::Report>(request)
    })
    .collect()
}
