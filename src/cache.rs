//! Bounded LRU response cache with per-entry TTL.
//!
//! TTL is applied on read; there is no background sweeper. A stale entry
//! keeps occupying capacity until the next read of its key or until LRU
//! pressure evicts it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

/// An upstream response as received, before any client-side compression.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    response: CachedResponse,
    inserted_at: Instant,
}

/// Keys ordered front-to-back from least to most recently used.
#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh hit promotes the key to most-recently-used; an expired entry is
    /// removed and reported as absent.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<CachedResponse> {
        let inserted_at = self.entries.get(key)?.inserted_at;
        if now.saturating_duration_since(inserted_at) > self.ttl {
            self.entries.remove(key);
            self.remove_from_order(key);
            return None;
        }
        self.promote(key);
        self.entries.get(key).map(|entry| entry.response.clone())
    }

    /// Insert or replace, stamping the entry's age from `now`, then evict
    /// least-recently-used entries until the capacity bound holds.
    pub fn put(&mut self, key: String, response: CachedResponse, now: Instant) {
        self.entries.insert(
            key.clone(),
            CacheEntry {
                response,
                inserted_at: now,
            },
        );
        self.promote(&key);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn promote(&mut self, key: &str) {
        if self.order.back().is_some_and(|candidate| candidate == key) {
            return;
        }
        self.remove_from_order(key);
        self.order.push_back(key.to_string());
    }

    fn remove_from_order(&mut self, key: &str) {
        if let Some(index) = self.order.iter().position(|candidate| candidate == key) {
            self.order.remove(index);
        }
    }
}
