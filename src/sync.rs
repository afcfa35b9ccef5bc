//! Background sync: tag keyed wake-up hooks that flush offline mutations.
//!
//! The host wakes a tag whenever it likes, possibly long after the code that
//! queued work is gone, so handlers must cope with an empty queue and with
//! being fired more than once.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

use crate::fetch::Fetcher;
use crate::http::Request;

/// A boxed future borrowed from its handler
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What one sync run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Mutations the backend accepted
  pub replayed: usize,
  /// Mutations the backend rejected; they are dropped
  pub rejected: usize,
  /// Mutations put back because the network was unavailable
  pub requeued: usize,
}

/// Offline mutations recorded while disconnected.
///
/// Owned by the offline data collaborator; this crate only drains it.
pub trait MutationQueue: Send + Sync {
  /// Take every pending mutation, oldest first.
  fn drain(&self) -> Result<Vec<Request>>;

  /// Put mutations back at the front, keeping their order.
  fn requeue(&self, mutations: Vec<Request>) -> Result<()>;

  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

/// In-process mutation queue.
#[derive(Default)]
pub struct MemoryQueue {
  inner: Mutex<VecDeque<Request>>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, mutation: Request) -> Result<()> {
    self.lock()?.push_back(mutation);
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Request>>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl MutationQueue for MemoryQueue {
  fn drain(&self) -> Result<Vec<Request>> {
    Ok(self.lock()?.drain(..).collect())
  }

  fn requeue(&self, mutations: Vec<Request>) -> Result<()> {
    let mut queue = self.lock()?;
    for mutation in mutations.into_iter().rev() {
      queue.push_front(mutation);
    }
    Ok(())
  }

  fn len(&self) -> Result<usize> {
    Ok(self.lock()?.len())
  }
}

/// Handler woken for a sync tag.
pub trait SyncHandler: Send + Sync {
  fn on_sync(&self) -> BoxFuture<'_, Result<SyncReport>>;
}

/// Mutations taken off the queue for one flush.
///
/// Anything still pending when this drops goes back on the queue, so a flush
/// cancelled mid-replay loses nothing. The mutation in flight at that point is
/// kept too and may be sent again on the next run.
struct InFlight {
  queue: Arc<dyn MutationQueue>,
  pending: VecDeque<Request>,
}

impl InFlight {
  fn take(queue: &Arc<dyn MutationQueue>) -> Result<Self> {
    Ok(Self {
      queue: Arc::clone(queue),
      pending: queue.drain()?.into(),
    })
  }

  /// Requeue what is left, reporting a failure to the caller.
  fn restore(&mut self) -> Result<()> {
    if self.pending.is_empty() {
      return Ok(());
    }
    self.queue.requeue(self.pending.drain(..).collect())
  }
}

impl Drop for InFlight {
  fn drop(&mut self) {
    let count = self.pending.len();
    if let Err(err) = self.restore() {
      warn!(error = %err, count, "failed to requeue pending mutations");
    }
  }
}

/// Replays queued mutations through the network, in order.
///
/// Stops at the first network failure and puts that mutation and everything
/// after it back on the queue. A mutation leaves the queue for good only once
/// the backend has answered it.
pub struct QueueFlush<F: Fetcher> {
  queue: Arc<dyn MutationQueue>,
  fetcher: Arc<F>,
}

impl<F: Fetcher> QueueFlush<F> {
  pub fn new(queue: Arc<dyn MutationQueue>, fetcher: Arc<F>) -> Self {
    Self { queue, fetcher }
  }

  async fn flush(&self) -> Result<SyncReport> {
    let mut in_flight = InFlight::take(&self.queue)?;
    let mut report = SyncReport::default();

    if in_flight.pending.is_empty() {
      debug!("sync fired with empty queue");
      return Ok(report);
    }

    while let Some(mutation) = in_flight.pending.front() {
      match self.fetcher.fetch(mutation).await {
        Ok(response) if response.is_success() => report.replayed += 1,
        Ok(response) => {
          warn!(
            method = %mutation.method,
            url = %mutation.url,
            status = response.status,
            "backend rejected queued mutation"
          );
          report.rejected += 1;
        }
        Err(err) => {
          debug!(error = %err, "network unavailable, requeueing");
          report.requeued = in_flight.pending.len();
          break;
        }
      }
      in_flight.pending.pop_front();
    }

    in_flight.restore()?;
    Ok(report)
  }
}

impl<F: Fetcher> SyncHandler for QueueFlush<F> {
  fn on_sync(&self) -> BoxFuture<'_, Result<SyncReport>> {
    Box::pin(self.flush())
  }
}

/// Registered sync hooks, keyed by tag.
#[derive(Default)]
pub struct SyncRegistry {
  handlers: Mutex<HashMap<String, Arc<dyn SyncHandler>>>,
}

impl SyncRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a handler for `tag`, replacing any previous one.
  pub fn register(&self, tag: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Result<()> {
    let mut handlers = self
      .handlers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    handlers.insert(tag.into(), handler);
    Ok(())
  }

  /// Returns whether a handler was registered.
  pub fn unregister(&self, tag: &str) -> Result<bool> {
    let mut handlers = self
      .handlers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(handlers.remove(tag).is_some())
  }

  pub fn is_registered(&self, tag: &str) -> bool {
    self
      .handlers
      .lock()
      .map(|h| h.contains_key(tag))
      .unwrap_or(false)
  }

  /// Wake the handler for `tag`. Unknown tags are ignored and return `None`.
  pub async fn fire(&self, tag: &str) -> Result<Option<SyncReport>> {
    // Clone out so the lock is not held across the await
    let handler = {
      let handlers = self
        .handlers
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      handlers.get(tag).cloned()
    };

    let Some(handler) = handler else {
      debug!(%tag, "sync fired for unregistered tag");
      return Ok(None);
    };

    let report = handler.on_sync().await?;
    info!(
      %tag,
      replayed = report.replayed,
      rejected = report.rejected,
      requeued = report.requeued,
      "sync complete"
    );

    Ok(Some(report))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::testing::ScriptedFetcher;
  use crate::fetch::FetchError;
  use crate::http::Response;
  use reqwest::Method;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use url::Url;

  const RECORDS: &str = "https://c1abc123.caspio.com/rest/v2/tables/Services/records";

  fn mutation(url: &str, body: &str) -> Request {
    Request::new(Method::POST, Url::parse(url).unwrap()).with_body(body)
  }

  fn bodies(queue: &MemoryQueue) -> Vec<Vec<u8>> {
    queue.drain().unwrap().into_iter().filter_map(|r| r.body).collect()
  }

  fn registry_with<F: Fetcher>(queue: &Arc<MemoryQueue>, fetcher: &Arc<F>) -> SyncRegistry {
    let registry = SyncRegistry::new();
    let queue: Arc<dyn MutationQueue> = queue.clone();
    registry
      .register(
        "background-sync",
        Arc::new(QueueFlush::new(queue, Arc::clone(fetcher))),
      )
      .unwrap();
    registry
  }

  /// Answers the first `answered` requests, then never answers again.
  struct Stalling {
    answered: usize,
    calls: AtomicUsize,
  }

  impl Stalling {
    fn after(answered: usize) -> Self {
      Self {
        answered,
        calls: AtomicUsize::new(0),
      }
    }
  }

  impl Fetcher for Stalling {
    fn fetch(
      &self,
      _request: &Request,
    ) -> impl Future<Output = std::result::Result<Response, FetchError>> + Send {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      let answered = self.answered;
      async move {
        if call < answered {
          Ok(Response::new(201, ""))
        } else {
          std::future::pending().await
        }
      }
    }
  }

  #[tokio::test]
  async fn empty_queue_is_a_noop() {
    let queue = Arc::new(MemoryQueue::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let registry = registry_with(&queue, &fetcher);

    let first = registry.fire("background-sync").await.unwrap().unwrap();
    let second = registry.fire("background-sync").await.unwrap().unwrap();

    assert_eq!(first, SyncReport::default());
    assert_eq!(second, SyncReport::default());
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn flush_replays_in_order() {
    let queue = Arc::new(MemoryQueue::new());
    queue.push(mutation(RECORDS, "a")).unwrap();
    queue.push(mutation(RECORDS, "b")).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().route(RECORDS, Response::new(201, "")));
    let registry = registry_with(&queue, &fetcher);

    let report = registry.fire("background-sync").await.unwrap().unwrap();

    assert_eq!(report.replayed, 2);
    assert!(queue.is_empty().unwrap());
    assert_eq!(fetcher.seen(), vec![format!("POST {}", RECORDS); 2]);

    // Firing again has nothing left to do
    let again = registry.fire("background-sync").await.unwrap().unwrap();
    assert_eq!(again, SyncReport::default());
  }

  #[tokio::test]
  async fn network_failure_requeues_remaining() {
    let queue = Arc::new(MemoryQueue::new());
    queue.push(mutation(RECORDS, "a")).unwrap();
    queue.push(mutation(RECORDS, "b")).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().route(RECORDS, Response::new(200, "")));
    fetcher.set_offline(true);
    let registry = registry_with(&queue, &fetcher);

    let report = registry.fire("background-sync").await.unwrap().unwrap();
    assert_eq!(report.requeued, 2);
    assert_eq!(queue.len().unwrap(), 2);

    fetcher.set_offline(false);
    let report = registry.fire("background-sync").await.unwrap().unwrap();
    assert_eq!(report.replayed, 2);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn cancelled_flush_keeps_every_mutation() {
    let queue = Arc::new(MemoryQueue::new());
    for body in ["a", "b", "c"] {
      queue.push(mutation(RECORDS, body)).unwrap();
    }
    let fetcher = Arc::new(Stalling::after(0));
    let registry = registry_with(&queue, &fetcher);

    let fired =
      tokio::time::timeout(Duration::from_millis(50), registry.fire("background-sync")).await;

    assert!(fired.is_err());
    assert_eq!(queue.len().unwrap(), 3);
    assert_eq!(bodies(&queue), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
  }

  #[tokio::test]
  async fn cancelled_flush_drops_only_answered_mutations() {
    let queue = Arc::new(MemoryQueue::new());
    for body in ["a", "b", "c"] {
      queue.push(mutation(RECORDS, body)).unwrap();
    }
    let fetcher = Arc::new(Stalling::after(1));
    let registry = registry_with(&queue, &fetcher);

    let fired =
      tokio::time::timeout(Duration::from_millis(50), registry.fire("background-sync")).await;
    assert!(fired.is_err());

    // Work queued while the flush was stuck stays behind the requeued items
    queue.push(mutation(RECORDS, "d")).unwrap();
    assert_eq!(
      bodies(&queue),
      vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
    );
  }

  #[tokio::test]
  async fn rejected_mutations_are_dropped() {
    let bad = "https://c1abc123.caspio.com/rest/v2/tables/Missing/records";
    let queue = Arc::new(MemoryQueue::new());
    queue.push(mutation(bad, "x")).unwrap();
    queue.push(mutation(RECORDS, "y")).unwrap();
    let fetcher = Arc::new(
      ScriptedFetcher::new()
        .route(bad, Response::new(400, "bad table"))
        .route(RECORDS, Response::new(200, "")),
    );
    let registry = registry_with(&queue, &fetcher);

    let report = registry.fire("background-sync").await.unwrap().unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.replayed, 1);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn unregistered_tag_is_ignored() {
    let registry = SyncRegistry::new();
    assert!(registry.fire("other-tag").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unregister_stops_firing() {
    let queue = Arc::new(MemoryQueue::new());
    queue.push(mutation(RECORDS, "a")).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().route(RECORDS, Response::new(200, "")));
    let registry = registry_with(&queue, &fetcher);

    assert!(registry.unregister("background-sync").unwrap());
    assert!(!registry.is_registered("background-sync"));
    assert!(registry.fire("background-sync").await.unwrap().is_none());
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[test]
  fn requeue_keeps_order_ahead_of_new_work() {
    let queue = MemoryQueue::new();
    queue.push(mutation(RECORDS, "new")).unwrap();
    queue
      .requeue(vec![mutation(RECORDS, "old-1"), mutation(RECORDS, "old-2")])
      .unwrap();

    assert_eq!(
      bodies(&queue),
      vec![b"old-1".to_vec(), b"old-2".to_vec(), b"new".to_vec()]
    );
  }

  #[tokio::test]
  async fn poisoned_queue_is_an_error() {
    let queue = Arc::new(MemoryQueue::new());
    let held = Arc::clone(&queue);
    let _ = std::thread::spawn(move || {
      let _guard = held.inner.lock().unwrap();
      panic!("writer died holding the queue");
    })
    .join();

    assert!(queue.push(mutation(RECORDS, "a")).is_err());
    assert!(queue.drain().is_err());
    assert!(queue.requeue(vec![mutation(RECORDS, "b")]).is_err());
    assert!(queue.len().is_err());
    assert!(queue.is_empty().is_err());

    let fetcher = Arc::new(ScriptedFetcher::new());
    let registry = registry_with(&queue, &fetcher);
    let err = registry.fire("background-sync").await.unwrap_err();
    assert!(err.to_string().contains("Lock poisoned"));
    assert_eq!(fetcher.calls(), 0);
  }
}
