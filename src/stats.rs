use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{self, Duration};
use tracing::info;

/// Monotonic counters for the filter stages.
///
/// Per-domain counters are keyed by the exact queried name and are only
/// touched by stages configured with `domain_metrics`.
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_queries: AtomicU64,
    blocked_queries: AtomicU64,
    allowed_queries: AtomicU64,

    // Unbounded: one entry per distinct queried name, never evicted.
    blocked_by_domain: Mutex<FxHashMap<Box<str>, u64>>,
    allowed_by_domain: Mutex<FxHashMap<Box<str>, u64>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DomainCount {
    pub domain: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub blocked_queries: u64,
    pub allowed_queries: u64,
    pub blocked_domains: Vec<DomainCount>,
    pub allowed_domains: Vec<DomainCount>,
}

impl StatsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Periodically logs a summary line until the process exits.
    pub fn spawn_logger(self: &Arc<Self>, log_interval: Duration) {
        if log_interval.is_zero() {
            return;
        }
        let stats = self.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(log_interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.dump_stats();
            }
        });
    }

    pub fn inc_queries(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocked(&self) {
        self.blocked_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_allowed(&self) {
        self.allowed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_domain_blocked(&self, domain: &str) {
        Self::bump(&self.blocked_by_domain, domain);
    }

    pub fn inc_domain_allowed(&self, domain: &str) {
        Self::bump(&self.allowed_by_domain, domain);
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    pub fn blocked(&self) -> u64 {
        self.blocked_queries.load(Ordering::Relaxed)
    }

    pub fn allowed(&self) -> u64 {
        self.allowed_queries.load(Ordering::Relaxed)
    }

    pub fn domain_blocked(&self, domain: &str) -> u64 {
        Self::get(&self.blocked_by_domain, domain)
    }

    pub fn domain_allowed(&self, domain: &str) -> u64 {
        Self::get(&self.allowed_by_domain, domain)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_queries: self.total_queries(),
            blocked_queries: self.blocked(),
            allowed_queries: self.allowed(),
            blocked_domains: Self::sorted(&self.blocked_by_domain),
            allowed_domains: Self::sorted(&self.allowed_by_domain),
        }
    }

    fn bump(map: &Mutex<FxHashMap<Box<str>, u64>>, domain: &str) {
        let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(domain) {
            Some(count) => *count += 1,
            None => {
                map.insert(domain.into(), 1);
            }
        }
    }

    fn get(map: &Mutex<FxHashMap<Box<str>, u64>>, domain: &str) -> u64 {
        let map = map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(domain).copied().unwrap_or(0)
    }

    /// Highest counts first, ties broken by name.
    fn sorted(map: &Mutex<FxHashMap<Box<str>, u64>>) -> Vec<DomainCount> {
        let map = map.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items: Vec<DomainCount> = map
            .iter()
            .map(|(domain, count)| DomainCount {
                domain: domain.to_string(),
                count: *count,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
        items
    }

    fn dump_stats(&self) {
        let total = self.total_queries();
        let blocked = self.blocked();
        let allowed = self.allowed();

        info!(
            "STATS DUMP: Total: {}, Blocked: {} ({:.1}%), Allowed over block: {}",
            total,
            blocked,
            if total > 0 {
                (blocked as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            allowed
        );
    }
}
