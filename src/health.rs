//! Background health monitor.
//!
//! The monitor is the sole writer of backend health state. It probes each
//! backend's `/health` endpoint on a fixed cadence and advances the
//! per-backend state machine; the balancer only ever reads the result.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::clock::Clock;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::registry::{Backend, BackendRegistry};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    client: reqwest::Client,
    interval: Duration,
    max_failures: u32,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        config: &ProxyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // Backends run on self-signed certificates; probes skip verification.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        Ok(Self {
            registry,
            client,
            interval: config.probe_interval(),
            max_failures: config.max_failures,
            clock,
        })
    }

    /// Probe loop; runs for the life of the process, even when every
    /// backend is out of rotation.
    pub async fn run(self) {
        loop {
            self.sweep().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One pass over the registry, probing each backend that is due.
    pub async fn sweep(&self) {
        for backend in self.registry.iter() {
            let now = self.clock.now();
            if !backend.probe_due(now, self.interval) {
                continue;
            }
            let healthy = self.probe(backend).await;
            let now = self.clock.now();
            if healthy {
                if backend.record_probe_success(now) {
                    tracing::info!(
                        url = backend.url(),
                        "backend healthy again, added back to rotation"
                    );
                }
            } else if backend.record_probe_failure(self.max_failures) {
                tracing::warn!(
                    url = backend.url(),
                    failures = backend.failure_count(),
                    "backend failed health checks, removed from rotation"
                );
            }
            backend.record_probe_attempt(now);
        }
        self.log_status();
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let url = format!("{}/health", backend.url());
        let result = self
            .client
            .get(&url)
            .header("X-Forwarded-For", "127.0.0.1")
            .send()
            .await;
        match result {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "health probe failed");
                false
            }
        }
    }

    fn log_status(&self) {
        let now = self.clock.now();
        let mut healthy = 0usize;
        for snapshot in self.registry.snapshots() {
            if snapshot.status == crate::registry::HealthState::Healthy {
                healthy += 1;
            }
            let last_healthy_secs = snapshot
                .last_healthy_at
                .map(|at| now.saturating_duration_since(at).as_secs());
            tracing::debug!(
                url = %snapshot.url,
                status = snapshot.status.as_str(),
                failures = snapshot.failure_count,
                last_healthy_secs,
                "backend status"
            );
        }
        if healthy == 0 {
            tracing::debug!("all backend servers are currently out of rotation");
        }
    }
}
