//! Backend records and their health state.
//!
//! Health fields are written only through the probe-outcome methods, which
//! the health monitor alone calls at runtime. Everything else takes
//! snapshots: status is an atomic; counters and timestamps are advisory.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    NotInitiated,
    Healthy,
    Unreachable,
}

impl HealthState {
    fn as_u8(self) -> u8 {
        match self {
            HealthState::NotInitiated => 0,
            HealthState::Healthy => 1,
            HealthState::Unreachable => 2,
        }
    }

    fn from_u8(raw: u8) -> HealthState {
        match raw {
            1 => HealthState::Healthy,
            2 => HealthState::Unreachable,
            _ => HealthState::NotInitiated,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::NotInitiated => "NOT_INITIATED",
            HealthState::Healthy => "HEALTHY",
            HealthState::Unreachable => "UNREACHABLE",
        }
    }
}

#[derive(Debug, Default)]
struct ProbeTimes {
    last_probe_at: Option<Instant>,
    last_healthy_at: Option<Instant>,
}

#[derive(Debug)]
pub struct Backend {
    url: String,
    status: AtomicU8,
    failure_count: AtomicU32,
    times: Mutex<ProbeTimes>,
}

/// Point-in-time view of one backend, for logs and diagnostics.
#[derive(Clone, Debug)]
pub struct BackendSnapshot {
    pub url: String,
    pub status: HealthState,
    pub failure_count: u32,
    pub last_probe_at: Option<Instant>,
    pub last_healthy_at: Option<Instant>,
}

impl Backend {
    pub fn new(url: impl Into<String>) -> Self {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self {
            url,
            status: AtomicU8::new(HealthState::NotInitiated.as_u8()),
            failure_count: AtomicU32::new(0),
            times: Mutex::new(ProbeTimes::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> HealthState {
        HealthState::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        let times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        BackendSnapshot {
            url: self.url.clone(),
            status: self.status(),
            failure_count: self.failure_count(),
            last_probe_at: times.last_probe_at,
            last_healthy_at: times.last_healthy_at,
        }
    }

    /// True when the backend is due for another probe.
    pub fn probe_due(&self, now: Instant, interval: std::time::Duration) -> bool {
        let times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        match times.last_probe_at {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }

    pub fn record_probe_attempt(&self, now: Instant) {
        let mut times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        times.last_probe_at = Some(now);
    }

    /// A 200 probe: the backend is healthy, whatever it was before.
    /// Returns true when this probe brought it (back) into rotation.
    pub fn record_probe_success(&self, now: Instant) -> bool {
        let previous = HealthState::from_u8(
            self.status
                .swap(HealthState::Healthy.as_u8(), Ordering::Relaxed),
        );
        self.failure_count.store(0, Ordering::Relaxed);
        let mut times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        times.last_healthy_at = Some(now);
        previous != HealthState::Healthy
    }

    /// A failed probe. A backend that has never been healthy stays
    /// `NotInitiated` no matter how many probes fail; a previously-healthy
    /// backend is demoted once the consecutive-failure threshold is hit.
    /// Returns true when this probe demoted it out of rotation.
    pub fn record_probe_failure(&self, max_failures: u32) -> bool {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < max_failures {
            return false;
        }
        let ever_healthy = {
            let times = self.times.lock().unwrap_or_else(|e| e.into_inner());
            times.last_healthy_at.is_some()
        };
        if !ever_healthy {
            return false;
        }
        let previous = HealthState::from_u8(
            self.status
                .swap(HealthState::Unreachable.as_u8(), Ordering::Relaxed),
        );
        previous == HealthState::Healthy
    }
}

/// The fixed set of upstreams, built once from configuration.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    pub fn new(urls: &[String]) -> Self {
        Self {
            backends: urls
                .iter()
                .map(|url| Arc::new(Backend::new(url.clone())))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }

    pub fn snapshots(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|backend| backend.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_backend_starts_not_initiated() {
        let backend = Backend::new("https://127.0.0.1:8000");
        assert_eq!(backend.status(), HealthState::NotInitiated);
        assert_eq!(backend.failure_count(), 0);
        assert!(backend.snapshot().last_healthy_at.is_none());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let backend = Backend::new("https://127.0.0.1:8000/");
        assert_eq!(backend.url(), "https://127.0.0.1:8000");
    }

    #[test]
    fn never_healthy_backend_never_becomes_unreachable() {
        let backend = Backend::new("https://127.0.0.1:8000");
        for _ in 0..20 {
            assert!(!backend.record_probe_failure(3));
        }
        assert_eq!(backend.status(), HealthState::NotInitiated);
        assert_eq!(backend.failure_count(), 20);
    }

    #[test]
    fn healthy_backend_demotes_after_max_failures() {
        let backend = Backend::new("https://127.0.0.1:8000");
        let now = Instant::now();
        assert!(backend.record_probe_success(now));
        assert_eq!(backend.status(), HealthState::Healthy);

        assert!(!backend.record_probe_failure(3));
        assert!(!backend.record_probe_failure(3));
        assert!(backend.record_probe_failure(3));
        assert_eq!(backend.status(), HealthState::Unreachable);
    }

    #[test]
    fn unreachable_backend_recovers_on_success() {
        let backend = Backend::new("https://127.0.0.1:8000");
        let now = Instant::now();
        backend.record_probe_success(now);
        for _ in 0..3 {
            backend.record_probe_failure(3);
        }
        assert_eq!(backend.status(), HealthState::Unreachable);

        assert!(backend.record_probe_success(now));
        assert_eq!(backend.status(), HealthState::Healthy);
        assert_eq!(backend.failure_count(), 0);
    }

    #[test]
    fn unreachable_backend_stays_unreachable_without_relogging() {
        let backend = Backend::new("https://127.0.0.1:8000");
        backend.record_probe_success(Instant::now());
        for _ in 0..3 {
            backend.record_probe_failure(3);
        }
        // Further failures keep the state but report no transition.
        assert!(!backend.record_probe_failure(3));
        assert_eq!(backend.status(), HealthState::Unreachable);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let backend = Backend::new("https://127.0.0.1:8000");
        let now = Instant::now();
        backend.record_probe_success(now);
        backend.record_probe_failure(3);
        backend.record_probe_failure(3);
        backend.record_probe_success(now);
        assert_eq!(backend.failure_count(), 0);

        backend.record_probe_failure(3);
        assert_eq!(backend.status(), HealthState::Healthy);
    }

    #[test]
    fn probe_due_respects_the_interval() {
        let backend = Backend::new("https://127.0.0.1:8000");
        let start = Instant::now();
        let interval = Duration::from_secs(1);

        assert!(backend.probe_due(start, interval));
        backend.record_probe_attempt(start);
        assert!(!backend.probe_due(start + Duration::from_millis(500), interval));
        assert!(backend.probe_due(start + Duration::from_secs(1), interval));
    }
}
