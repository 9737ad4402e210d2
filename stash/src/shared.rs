use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::expiry::{ExpiryPolicy, Staleness};
use crate::handles::{Built, GetOptions};
use crate::hold::{Claim, Hold, HoldRegistry, Outcome};
use crate::metrics::Metrics;
use crate::store::Store;
use crate::task::debounce::Debouncer;
use crate::time;
use crate::value::Payload;

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared {
  pub(crate) name: String,
  pub(crate) store: Arc<dyn Store>,
  pub(crate) holds: HoldRegistry,
  pub(crate) expiry: ExpiryPolicy,
  pub(crate) read_enabled: bool,
  pub(crate) write_enabled: bool,
  pub(crate) metrics: Metrics,
  pub(crate) free_timer: Option<Debouncer>,
}

impl fmt::Debug for CacheShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("name", &self.name)
      .field("time_to_live", &self.expiry.time_to_live)
      .field("time_to_idle", &self.expiry.time_to_idle)
      .field("read_enabled", &self.read_enabled)
      .field("write_enabled", &self.write_enabled)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl CacheShared {
  /// Finds a fresh entry for `key`, running the builder from `options` on a
  /// miss.
  ///
  /// Only one build per key runs at a time. A lookup that finds a build in
  /// progress waits for it and starts over, so it never sees a half-built
  /// entry. If the build fails, everyone waiting on it gets the same error.
  pub(crate) async fn lookup(&self, key: &str, options: GetOptions) -> Result<Option<Arc<CacheEntry>>> {
    let GetOptions {
      mut builder,
      last_modified,
      mut rebuild,
    } = options;
    let mut built: Option<Arc<CacheEntry>> = None;
    let mut counted_miss = false;

    loop {
      if !self.read_enabled {
        return Ok(None);
      }

      if let Some(hold) = self.holds.current(key) {
        self.wait(key, &hold).await?;
        continue;
      }

      if let Some(entry) = self.store.get(key).await {
        // A forced rebuild only skips the hit when it can actually build.
        if !(rebuild && builder.is_some()) {
          let now = time::now_millis();
          match self.expiry.check(&entry.meta(), last_modified, now) {
            None => {
              if self.expiry.tracks_access() {
                entry.touch(now);
              }
              if built.is_none() {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
              }
              return Ok(Some(entry));
            }
            Some(reason) => self.invalidate(key, reason).await,
          }
        }
      }

      if let Some(entry) = built.take() {
        // The store did not keep the built entry (writes disabled, or the key
        // was removed during the build). Hand it back anyway.
        return Ok(Some(entry));
      }

      if !counted_miss {
        counted_miss = true;
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
      }

      let Some(build) = builder.take() else {
        return Ok(None);
      };

      let guard = match self.holds.try_hold(key) {
        Claim::Busy(hold) => {
          builder = Some(build);
          self.wait(key, &hold).await?;
          continue;
        }
        Claim::Acquired(guard) => guard,
      };

      tracing::debug!(cache = %self.name, key, "building entry");
      self.metrics.builds.fetch_add(1, Ordering::Relaxed);

      let result = match build().await {
        Ok(result) => result,
        Err(source) => {
          self.metrics.build_failures.fetch_add(1, Ordering::Relaxed);
          let err = CacheError::BuildFailed {
            key: key.to_owned(),
            source: Arc::from(source),
          };
          tracing::debug!(cache = %self.name, key, error = %err, "build failed");
          guard.release(Outcome::Failed(err.clone()));
          return Err(err);
        }
      };

      let Built {
        payload,
        last_modified: reported,
      } = result;
      let entry = self.new_entry(key, payload, reported.or(last_modified));
      // A result older than the version asked for would be evicted on the
      // next read, so it goes back to the caller without being stored.
      let outdated = matches!((reported, last_modified), (Some(got), Some(wanted)) if got < wanted);
      if outdated {
        tracing::debug!(cache = %self.name, key, reported = ?reported, wanted = ?last_modified, "built value is older than requested, not storing");
      }

      match &entry {
        Some(entry) if !guard.is_detached() && self.write_enabled && !outdated => {
          self.store.put(key, entry.clone()).await;
          self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        }
        None if !guard.is_detached() && self.write_enabled => {
          self.store.remove(key).await;
        }
        _ => {}
      }
      guard.release(Outcome::Settled);

      match entry {
        Some(entry) => built = Some(entry),
        None => return Ok(None),
      }
      rebuild = false;
    }
  }

  async fn wait(&self, key: &str, hold: &Arc<Hold>) -> Result<()> {
    self.metrics.hold_waits.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(cache = %self.name, key, "waiting for build in progress");
    match hold.released().await {
      Outcome::Settled => Ok(()),
      Outcome::Failed(err) => Err(err),
    }
  }

  async fn invalidate(&self, key: &str, reason: Staleness) {
    let counter = match reason {
      Staleness::Idle => &self.metrics.evicted_by_tti,
      Staleness::Expired => &self.metrics.evicted_by_ttl,
      Staleness::Outdated => &self.metrics.evicted_by_version,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(cache = %self.name, key, ?reason, "evicting stale entry");
    self.store.remove(key).await;
  }

  /// Wraps a payload into an entry stamped for this cache. An empty payload
  /// has no entry.
  fn new_entry(&self, key: &str, payload: Payload, last_modified: Option<u64>) -> Option<Arc<CacheEntry>> {
    let entry = match payload {
      Payload::Value(value) => CacheEntry::new(key).with_value(value),
      Payload::Reader(reader) => CacheEntry::new(key).with_reader(reader),
      Payload::Empty => return None,
    };
    let meta = self.expiry.stamp(last_modified, time::now_millis());
    Some(Arc::new(entry.with_meta(meta)))
  }

  pub(crate) async fn put(&self, key: &str, payload: Payload, last_modified: Option<u64>) {
    if !self.write_enabled {
      return;
    }
    match self.new_entry(key, payload, last_modified) {
      Some(entry) => {
        self.store.put(key, entry).await;
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
      }
      None => self.remove(key).await,
    }
  }

  pub(crate) async fn remove(&self, key: &str) {
    // A build still running for this key must not bring it back.
    self.holds.detach(key);
    self.store.remove(key).await;
    self.metrics.removals.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn free(&self) {
    self.metrics.frees.fetch_add(1, Ordering::Relaxed);
    self.store.free();
    tracing::info!(cache = %self.name, "freed in-memory store state");
  }

  /// Restarts the inactivity timer that frees the store.
  pub(crate) fn schedule_free(self: &Arc<Self>) {
    if let Some(timer) = &self.free_timer {
      let shared: Weak<Self> = Arc::downgrade(self);
      timer.schedule(move || async move {
        if let Some(shared) = shared.upgrade() {
          shared.free();
        }
      });
    }
  }
}
