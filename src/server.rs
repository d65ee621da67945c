//! Shared request context, router construction, and the TLS listener.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;

use crate::balancer::RoundRobin;
use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::forward;
use crate::health::HealthMonitor;
use crate::registry::BackendRegistry;
use crate::tls;

/// Everything a request handler needs, passed explicitly so tests can
/// build isolated instances.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub cache: Arc<Mutex<ResponseCache>>,
    pub registry: Arc<BackendRegistry>,
    pub balancer: Arc<RoundRobin>,
    pub client: reqwest::Client,
    pub clock: Arc<dyn Clock>,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ProxyConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        // Upstreams present self-signed certificates; verification is off
        // and the transport keeps its default timeout.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        Ok(Self {
            cache: Arc::new(Mutex::new(ResponseCache::new(
                config.cache_capacity,
                config.cache_ttl(),
            ))),
            registry: Arc::new(BackendRegistry::new(&config.backend_urls)),
            balancer: Arc::new(RoundRobin::new()),
            client,
            clock,
            config: Arc::new(config),
        })
    }
}

/// Every path and method funnels into the forwarding pipeline.
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(forward::handle).with_state(state)
}

/// Bind the TLS listener, start the health monitor, and serve until a
/// shutdown signal arrives; in-flight requests are allowed to drain.
pub async fn serve(state: ProxyState) -> Result<()> {
    let config = Arc::clone(&state.config);

    let monitor = HealthMonitor::new(Arc::clone(&state.registry), &config, Arc::clone(&state.clock))?;
    tokio::spawn(monitor.run());

    let rustls_config = tls::load_rustls_config(&config.cert_file, &config.key_file).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let app = router(state);

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    tracing::info!(%addr, backends = config.backend_urls.len(), "proxy listening");
    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

async fn shutdown_on_signal(handle: axum_server::Handle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received, draining in-flight requests");
        handle.graceful_shutdown(None);
    }
}
