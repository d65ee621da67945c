//! tollgate — a TLS-terminating reverse proxy.
//!
//! Clients authenticate with a shared `X-API-Key`; requests are forwarded
//! round-robin over the healthy subset of a fixed backend pool, with a
//! bounded retry budget, an LRU+TTL cache for GET responses, and response
//! bodies compressed to match the client's `Accept-Encoding`. A background
//! monitor probes every backend's `/health` endpoint and owns all health
//! state.

pub mod balancer;
pub mod cache;
pub mod clock;
pub mod compress;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod forward;
pub mod health;
pub mod registry;
pub mod server;
pub mod tls;

pub use balancer::RoundRobin;
pub use cache::{CachedResponse, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::{Encoding, compress};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use fingerprint::fingerprint;
pub use health::HealthMonitor;
pub use registry::{Backend, BackendRegistry, BackendSnapshot, HealthState};
pub use server::{ProxyState, router, serve};
