use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::builder::CacheBuilder;
use crate::entry::CacheEntry;
use crate::error::{BoxError, CacheError, Result};
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;
use crate::stream::DelayedStream;
use crate::value::{Payload, Reader, Value};

pub(crate) type BuildFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Built, BoxError>> + Send>;

/// What a builder produces: a payload and, optionally, the version it
/// corresponds to.
#[derive(Debug, Clone, Default)]
pub struct Built {
  pub payload: Payload,
  pub last_modified: Option<u64>,
}

impl Built {
  pub fn new(payload: impl Into<Payload>) -> Self {
    Self {
      payload: payload.into(),
      last_modified: None,
    }
  }

  /// Records the version of the built value. It takes precedence over the
  /// `last_modified` the lookup was made with.
  pub fn last_modified(mut self, version: u64) -> Self {
    self.last_modified = Some(version);
    self
  }
}

macro_rules! built_from {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for Built {
        fn from(payload: $ty) -> Self {
          Built::new(payload)
        }
      }
    )*
  };
}

built_from!(Payload, Value, Reader, String, &str, Bytes, Vec<u8>, serde_json::Value);

/// Options for a lookup.
#[derive(Default)]
pub struct GetOptions {
  pub(crate) builder: Option<BuildFn>,
  pub(crate) last_modified: Option<u64>,
  pub(crate) rebuild: bool,
}

impl GetOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Computes the value on a miss. The builder runs at most once per call,
  /// and not at all if another caller is already building the same key.
  pub fn builder<F, Fut, T, E>(mut self, build: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Into<Built>,
    E: Into<BoxError>,
  {
    self.builder = Some(Box::new(move || {
      let fut = build();
      async move {
        match fut.await {
          Ok(value) => Ok::<Built, BoxError>(value.into()),
          Err(err) => Err(err.into()),
        }
      }
      .boxed()
    }));
    self
  }

  /// The newest version the caller knows of. Entries with an older or no
  /// recorded version are treated as stale.
  pub fn last_modified(mut self, version: u64) -> Self {
    self.last_modified = Some(version);
    self
  }

  /// Runs the builder even if a fresh entry exists.
  pub fn rebuild(mut self, rebuild: bool) -> Self {
    self.rebuild = rebuild;
    self
  }
}

impl fmt::Debug for GetOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GetOptions")
      .field("has_builder", &self.builder.is_some())
      .field("last_modified", &self.last_modified)
      .field("rebuild", &self.rebuild)
      .finish()
  }
}

/// Options for a write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
  pub last_modified: Option<u64>,
}

impl PutOptions {
  pub fn last_modified(version: u64) -> Self {
    Self {
      last_modified: Some(version),
    }
  }
}

/// A thread-safe, asynchronous cache over a pluggable [`Store`](crate::store::Store).
///
/// Cloning is cheap; clones share the same store, builds in progress and
/// metrics.
#[derive(Debug, Clone)]
pub struct Cache {
  pub(crate) shared: Arc<CacheShared>,
}

impl Cache {
  pub fn builder() -> CacheBuilder {
    CacheBuilder::new()
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// Looks up `key` and returns its fresh value, building it on a miss if
  /// `options` carries a builder.
  pub async fn get(&self, key: &str, options: GetOptions) -> Result<Option<Value>> {
    match self.get_entry(key, options).await? {
      Some(entry) => entry.read_value().await.map(Some),
      None => Ok(None),
    }
  }

  /// Like [`get`](Self::get) but returns the entry itself, leaving it to the
  /// caller whether to materialize or stream it.
  pub async fn get_entry(&self, key: &str, options: GetOptions) -> Result<Option<Arc<CacheEntry>>> {
    self.shared.schedule_free();
    self.shared.lookup(key, options).await
  }

  /// `true` if a fresh entry exists for `key`. Never runs a builder.
  pub async fn contains(&self, key: &str, last_modified: Option<u64>) -> Result<bool> {
    let options = GetOptions {
      builder: None,
      last_modified,
      rebuild: false,
    };
    Ok(self.get_entry(key, options).await?.is_some())
  }

  /// Returns a stream over the value of `key` without materializing it.
  ///
  /// The stream is returned at once; the lookup runs when it is first polled.
  /// If there is no fresh entry, and the builder does not produce one, the
  /// stream yields an error.
  pub fn create_read_stream(&self, key: &str, options: GetOptions) -> DelayedStream {
    self.shared.schedule_free();
    let shared = self.shared.clone();
    let key = key.to_owned();
    DelayedStream::new(async move {
      match shared.lookup(&key, options).await? {
        Some(entry) => entry.create_read_stream(),
        None => Err(CacheError::StreamUnavailable { key }),
      }
    })
  }

  /// Stores `payload` under `key`. An empty payload removes the key.
  pub async fn put(&self, key: &str, payload: impl Into<Payload>) {
    self.put_with(key, payload, PutOptions::default()).await
  }

  pub async fn put_with(&self, key: &str, payload: impl Into<Payload>, options: PutOptions) {
    self.shared.schedule_free();
    self
      .shared
      .put(key, payload.into(), options.last_modified)
      .await
  }

  /// Removes `key`. A build running for it still returns its value to its
  /// own caller, but that value is not stored.
  pub async fn remove(&self, key: &str) {
    self.shared.schedule_free();
    self.shared.remove(key).await
  }

  /// Persists everything the store has buffered.
  pub async fn flush(&self) {
    self.shared.store.flush().await
  }

  /// Asks the store to drop in-memory state it can reload later.
  pub fn free(&self) {
    self.shared.free()
  }

  /// The number of keys with a build in progress.
  pub fn pending_builds(&self) -> usize {
    self.shared.holds.len()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
