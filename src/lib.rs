//! Offline request cache and background sync for field inspection clients.
//!
//! Requests are classified and answered cache-first (static assets),
//! network-first (backend API) or stale-while-revalidate (everything else)
//! from a versioned cache generation. See [`worker::ServiceWorker`] for the
//! entry point and [`lifecycle::Lifecycle`] for generation management.

pub mod cache;
pub mod classify;
pub mod config;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod notify;
pub mod sync;
pub mod worker;
