use crate::codec::EntryCodec;
use crate::error::BuildError;
use crate::expiry::ExpiryPolicy;
use crate::handles::Cache;
use crate::hold::HoldRegistry;
use crate::metrics::Metrics;
use crate::shared::CacheShared;
use crate::store::{DiskOptions, DiskStore, MemoryStore, Store};
use crate::task::debounce::Debouncer;

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

const UNNAMED: &str = "(unnamed)";

/// Where a cache keeps its entries.
#[derive(Clone)]
pub(crate) enum StoreChoice {
  Memory,
  Disk(DiskOptions),
  Custom(Arc<dyn Store>),
}

/// A builder for creating `Cache` instances.
#[derive(Clone)]
pub struct CacheBuilder {
  name: Option<String>,
  time_to_live: Option<Duration>,
  time_to_idle: Option<Duration>,
  free_delay: Option<Duration>,
  read: bool,
  write: bool,
  store: StoreChoice,
  codec: Option<Arc<dyn EntryCodec>>,
}

// Manual Debug implementation for CacheBuilder.
impl fmt::Debug for CacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let store = match &self.store {
      StoreChoice::Memory => "memory",
      StoreChoice::Disk(_) => "disk",
      StoreChoice::Custom(_) => "custom",
    };
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("time_to_live", &self.time_to_live)
      .field("time_to_idle", &self.time_to_idle)
      .field("free_delay", &self.free_delay)
      .field("read", &self.read)
      .field("write", &self.write)
      .field("store", &store)
      .field("codec", &self.codec.is_some())
      .finish()
  }
}

fn non_zero(duration: Duration) -> Option<Duration> {
  (!duration.is_zero()).then_some(duration)
}

// --- General Configuration Methods ---
impl CacheBuilder {
  /// Creates a builder for a readable, writable, in-memory cache with no
  /// expiration.
  pub fn new() -> Self {
    Self {
      name: None,
      time_to_live: None,
      time_to_idle: None,
      free_delay: None,
      read: true,
      write: true,
      store: StoreChoice::Memory,
      codec: None,
    }
  }

  /// A name used in logs.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Sets a time-to-live (TTL) for all entries in the cache. Zero disables it.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.time_to_live = non_zero(duration);
    self
  }

  /// Sets a time-to-idle (TTI) for all entries in the cache. Zero disables it.
  pub fn time_to_idle(mut self, duration: Duration) -> Self {
    self.time_to_idle = non_zero(duration);
    self
  }

  /// Frees the store's in-memory state after this much inactivity. Zero
  /// disables it.
  pub fn free_delay(mut self, duration: Duration) -> Self {
    self.free_delay = non_zero(duration);
    self
  }

  /// When disabled, every lookup misses and builders never run.
  pub fn read(mut self, enabled: bool) -> Self {
    self.read = enabled;
    self
  }

  /// When disabled, `put` does nothing and built values are not stored.
  pub fn write(mut self, enabled: bool) -> Self {
    self.write = enabled;
    self
  }

  // --- Store Selection ---

  pub fn memory_store(mut self) -> Self {
    self.store = StoreChoice::Memory;
    self
  }

  pub fn disk_store(mut self, options: DiskOptions) -> Self {
    self.store = StoreChoice::Disk(options);
    self
  }

  /// Uses a caller-provided store implementation.
  pub fn store(mut self, store: Arc<dyn Store>) -> Self {
    self.store = StoreChoice::Custom(store);
    self
  }

  /// Attaches a serialize/deserialize pair to the disk store, whether the
  /// store is chosen before or after. Has no effect on other stores.
  pub fn codec(mut self, codec: Arc<dyn EntryCodec>) -> Self {
    self.codec = Some(codec);
    self
  }

  // --- Build Methods ---

  /// Builds the cache.
  ///
  /// A `free_delay` or a disk store with a flush delay needs a Tokio runtime
  /// to schedule its timers on.
  pub fn build(self) -> Result<Cache, BuildError> {
    let store: Arc<dyn Store> = match self.store {
      StoreChoice::Memory => Arc::new(MemoryStore::new()),
      StoreChoice::Disk(options) => {
        let options = match self.codec {
          Some(codec) => options.codec(codec),
          None => options,
        };
        Arc::new(DiskStore::new(options)?)
      }
      StoreChoice::Custom(store) => store,
    };
    let free_timer = self.free_delay.map(Debouncer::new).transpose()?;
    let name = self.name.unwrap_or_else(|| UNNAMED.to_string());

    tracing::debug!(
      cache = %name,
      time_to_live = ?self.time_to_live,
      time_to_idle = ?self.time_to_idle,
      free_delay = ?self.free_delay,
      "building cache"
    );

    let shared = CacheShared {
      name,
      store,
      holds: HoldRegistry::new(),
      expiry: ExpiryPolicy {
        time_to_live: self.time_to_live,
        time_to_idle: self.time_to_idle,
      },
      read_enabled: self.read,
      write_enabled: self.write,
      metrics: Metrics::new(),
      free_timer,
    };
    Ok(Cache {
      shared: Arc::new(shared),
    })
  }
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}
