//! Policy + spending cache.
//!
//! A single principal-keyed policy cache plus a parallel spending cache,
//! backed by `moka::sync::Cache`. Expiry is tracked
//! explicitly via `expires_at` rather than relying solely on moka's TTL
//! eviction, because degraded mode needs to read a *stale* entry after its
//! TTL has passed — moka's `get` would otherwise have already evicted it.
//! An eviction listener feeds the `evictions` counter `stats()` reports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use caracal_policy::AuthorityPolicy;
use chrono::{DateTime, Duration, Utc};
use moka::sync::Cache;

pub const DEFAULT_TTL_SECONDS: i64 = 60;
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct CachedPolicy {
    pub policy: AuthorityPolicy,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedPolicy {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_seconds().max(0)
    }
}

/// A coarse running total of metered spend for a principal, used to fail
/// closed on budget checks even when the policy store is unreachable.
#[derive(Debug, Clone)]
pub struct SpendingSketch {
    pub total_cost: f64,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub size: u64,
}

pub struct PolicyCache {
    policy_cache: Cache<String, Arc<CachedPolicy>>,
    spending_cache: Cache<String, Arc<SpendingSketch>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
    invalidations: AtomicU64,
}

impl PolicyCache {
    pub fn new(ttl_seconds: i64, max_entries: u64) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let evictions_for_listener = evictions.clone();
        let policy_cache = Cache::builder()
            .max_capacity(max_entries)
            .eviction_listener(move |_, _, _| {
                evictions_for_listener.fetch_add(1, Ordering::Relaxed);
            })
            .build();
        let spending_cache = Cache::builder().max_capacity(max_entries).build();
        Self {
            policy_cache,
            spending_cache,
            ttl: Duration::seconds(ttl_seconds),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions,
            invalidations: AtomicU64::new(0),
        }
    }

    /// Returns the entry regardless of freshness — callers decide whether a
    /// stale hit is usable (the degraded-mode path) via `CachedPolicy::is_fresh`.
    pub fn get(&self, principal_id: &str) -> Option<Arc<CachedPolicy>> {
        match self.policy_cache.get(principal_id) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, principal_id: &str, policy: AuthorityPolicy, now: DateTime<Utc>) -> Arc<CachedPolicy> {
        let entry = Arc::new(CachedPolicy {
            policy,
            cached_at: now,
            expires_at: now + self.ttl,
        });
        self.policy_cache.insert(principal_id.to_string(), entry.clone());
        entry
    }

    pub fn invalidate(&self, principal_id: &str) {
        self.policy_cache.invalidate(principal_id);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Invalidates every cached principal whose id matches `pattern`
    /// (the same glob syntax mandate scopes use).
    pub fn invalidate_pattern(&self, pattern: &str) {
        let matching: Vec<String> = self
            .policy_cache
            .iter()
            .filter(|(key, _)| caracal_mandate::glob_matches(pattern, key.as_str()).unwrap_or(false))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in matching {
            self.invalidate(&key);
        }
    }

    pub fn clear(&self) {
        self.policy_cache.invalidate_all();
        self.spending_cache.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        self.policy_cache.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.policy_cache.entry_count(),
        }
    }

    pub fn record_spending(&self, principal_id: &str, cost: f64, now: DateTime<Utc>, window: StdDuration) {
        let window = Duration::from_std(window).unwrap_or(self.ttl);
        let updated = match self.spending_cache.get(principal_id) {
            Some(sketch) if now - sketch.window_start <= window => Arc::new(SpendingSketch {
                total_cost: sketch.total_cost + cost,
                window_start: sketch.window_start,
            }),
            _ => Arc::new(SpendingSketch {
                total_cost: cost,
                window_start: now,
            }),
        };
        self.spending_cache.insert(principal_id.to_string(), updated);
    }

    pub fn spending_for(&self, principal_id: &str) -> Option<Arc<SpendingSketch>> {
        self.spending_cache.get(principal_id)
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_ENTRIES)
    }
}
