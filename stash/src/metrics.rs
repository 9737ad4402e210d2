use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Builders ---
  pub(crate) builds: CachePadded<AtomicU64>,
  pub(crate) build_failures: CachePadded<AtomicU64>,
  pub(crate) hold_waits: CachePadded<AtomicU64>,

  // --- Invalidation Stats ---
  pub(crate) evicted_by_ttl: CachePadded<AtomicU64>,
  pub(crate) evicted_by_tti: CachePadded<AtomicU64>,
  pub(crate) evicted_by_version: CachePadded<AtomicU64>,

  pub(crate) frees: CachePadded<AtomicU64>,

  // --- Timestamps for Uptime ---
  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      builds: CachePadded::new(AtomicU64::new(0)),
      build_failures: CachePadded::new(AtomicU64::new(0)),
      hold_waits: CachePadded::new(AtomicU64::new(0)),
      evicted_by_ttl: CachePadded::new(AtomicU64::new(0)),
      evicted_by_tti: CachePadded::new(AtomicU64::new(0)),
      evicted_by_version: CachePadded::new(AtomicU64::new(0)),
      frees: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      builds: self.builds.load(Ordering::Relaxed),
      build_failures: self.build_failures.load(Ordering::Relaxed),
      hold_waits: self.hold_waits.load(Ordering::Relaxed),
      evicted_by_ttl: self.evicted_by_ttl.load(Ordering::Relaxed),
      evicted_by_tti: self.evicted_by_tti.load(Ordering::Relaxed),
      evicted_by_version: self.evicted_by_version.load(Ordering::Relaxed),
      frees: self.frees.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups that found a fresh entry.
  pub hits: u64,
  /// Lookups that found nothing usable, before any builder ran.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Entries written through `put` or a builder.
  pub inserts: u64,
  /// Explicit removals, including puts of an empty payload.
  pub removals: u64,
  /// Builder invocations.
  pub builds: u64,
  /// Builder invocations that returned an error.
  pub build_failures: u64,
  /// Times a lookup waited for another caller's build.
  pub hold_waits: u64,
  /// Entries found stale because they outlived their time-to-live.
  pub evicted_by_ttl: u64,
  /// Entries found stale because they sat idle too long.
  pub evicted_by_tti: u64,
  /// Entries found stale because the caller had a newer version.
  pub evicted_by_version: u64,
  /// Times the store was asked to free its in-memory state.
  pub frees: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("removals", &self.removals)
      .field("builds", &self.builds)
      .field("build_failures", &self.build_failures)
      .field("hold_waits", &self.hold_waits)
      .field("evicted_by_ttl", &self.evicted_by_ttl)
      .field("evicted_by_tti", &self.evicted_by_tti)
      .field("evicted_by_version", &self.evicted_by_version)
      .field("frees", &self.frees)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
