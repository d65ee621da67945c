//! Round-robin selection over the healthy subset of the registry.

use std::sync::{Arc, Mutex};

use crate::registry::{Backend, BackendRegistry, HealthState};

/// A single cursor shared by every in-flight request. The cursor advances
/// exactly once per candidate examined, so N successive picks over N
/// healthy backends return each backend exactly once.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next healthy backend in rotation, or `None` when every backend is
    /// out of rotation. The mutex is held only for the O(N) scan.
    pub fn pick(&self, registry: &BackendRegistry) -> Option<Arc<Backend>> {
        let n = registry.len();
        if n == 0 {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let start = *cursor;
        loop {
            *cursor = (*cursor + 1) % n;
            let backend = registry.get(*cursor)?;
            if backend.status() == HealthState::Healthy {
                return Some(Arc::clone(backend));
            }
            if *cursor == start {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn registry(urls: &[&str]) -> BackendRegistry {
        let urls: Vec<String> = urls.iter().map(|url| url.to_string()).collect();
        BackendRegistry::new(&urls)
    }

    fn mark_healthy(registry: &BackendRegistry, index: usize) {
        registry
            .get(index)
            .expect("backend index")
            .record_probe_success(Instant::now());
    }

    #[test]
    fn all_healthy_backends_are_visited_exactly_once_per_round() {
        let registry = registry(&["https://a", "https://b", "https://c"]);
        for index in 0..3 {
            mark_healthy(&registry, index);
        }
        let balancer = RoundRobin::new();

        let round: Vec<String> = (0..3)
            .map(|_| balancer.pick(&registry).expect("healthy pick").url().to_string())
            .collect();

        // The cursor increments before the pick, so rotation starts at the
        // second backend.
        assert_eq!(round, ["https://b", "https://c", "https://a"]);

        let mut sorted = round;
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn unhealthy_backends_are_skipped() {
        let registry = registry(&["https://a", "https://b", "https://c"]);
        mark_healthy(&registry, 1);
        let balancer = RoundRobin::new();

        for _ in 0..6 {
            let backend = balancer.pick(&registry).expect("one healthy backend");
            assert_eq!(backend.url(), "https://b");
        }
    }

    #[test]
    fn no_healthy_backend_returns_none() {
        let registry = registry(&["https://a", "https://b"]);
        let balancer = RoundRobin::new();
        assert!(balancer.pick(&registry).is_none());
    }

    #[test]
    fn demoted_backend_leaves_rotation() {
        let registry = registry(&["https://a", "https://b"]);
        mark_healthy(&registry, 0);
        mark_healthy(&registry, 1);
        let balancer = RoundRobin::new();

        let backend = registry.get(0).expect("backend");
        for _ in 0..3 {
            backend.record_probe_failure(3);
        }

        for _ in 0..4 {
            let picked = balancer.pick(&registry).expect("healthy pick");
            assert_eq!(picked.url(), "https://b");
        }
    }

    #[test]
    fn single_healthy_backend_is_returned_repeatedly() {
        let registry = registry(&["https://a"]);
        mark_healthy(&registry, 0);
        let balancer = RoundRobin::new();
        for _ in 0..3 {
            assert_eq!(balancer.pick(&registry).expect("pick").url(), "https://a");
        }
    }

    #[test]
    fn empty_registry_returns_none() {
        let registry = registry(&[]);
        let balancer = RoundRobin::new();
        assert!(balancer.pick(&registry).is_none());
    }
}
