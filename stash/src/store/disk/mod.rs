mod aggregated;
mod format;
mod sharded;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use self::aggregated::AggregatedStore;
use self::sharded::ShardedStore;
use super::Store;
use crate::codec::EntryCodec;
use crate::entry::CacheEntry;
use crate::error::BuildError;
use crate::task::debounce::Debouncer;
use crate::value::Encoding;

const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(1000);

/// Settings for a [`DiskStore`].
#[derive(Clone)]
pub struct DiskOptions {
  pub(crate) dir: PathBuf,
  pub(crate) single_file: bool,
  pub(crate) encoding: Option<Encoding>,
  pub(crate) flush_delay: Option<Duration>,
  pub(crate) codec: Option<Arc<dyn EntryCodec>>,
}

impl DiskOptions {
  pub fn new(dir: impl AsRef<Path>) -> Self {
    Self {
      dir: dir.as_ref().to_path_buf(),
      single_file: false,
      encoding: None,
      flush_delay: Some(DEFAULT_FLUSH_DELAY),
      codec: None,
    }
  }

  /// Keeps the whole cache in one `cache.json` instead of one file per key.
  pub fn single_file(mut self, single_file: bool) -> Self {
    self.single_file = single_file;
    self
  }

  /// The encoding reader-backed payloads are persisted and read back with.
  /// Without one, each reader's own encoding is used.
  pub fn encoding(mut self, encoding: Option<Encoding>) -> Self {
    self.encoding = encoding;
    self
  }

  /// How long after the last mutation buffered state is written out.
  /// `None` writes only on an explicit [`Store::flush`].
  pub fn flush_delay(mut self, delay: Option<Duration>) -> Self {
    self.flush_delay = delay;
    self
  }

  pub fn codec(mut self, codec: Arc<dyn EntryCodec>) -> Self {
    self.codec = Some(codec);
    self
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }
}

impl fmt::Debug for DiskOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DiskOptions")
      .field("dir", &self.dir)
      .field("single_file", &self.single_file)
      .field("encoding", &self.encoding)
      .field("flush_delay", &self.flush_delay)
      .field("codec", &self.codec.is_some())
      .finish()
  }
}

#[derive(Clone)]
enum Layout {
  Sharded(Arc<ShardedStore>),
  Aggregated(Arc<AggregatedStore>),
}

enum WeakLayout {
  Sharded(Weak<ShardedStore>),
  Aggregated(Weak<AggregatedStore>),
}

impl Layout {
  fn downgrade(&self) -> WeakLayout {
    match self {
      Layout::Sharded(store) => WeakLayout::Sharded(Arc::downgrade(store)),
      Layout::Aggregated(store) => WeakLayout::Aggregated(Arc::downgrade(store)),
    }
  }

  /// `false` if some buffered state could not be written.
  async fn flush(&self) -> bool {
    match self {
      Layout::Sharded(store) => store.flush().await,
      Layout::Aggregated(store) => store.flush().await,
    }
  }
}

impl WeakLayout {
  fn upgrade(&self) -> Option<Layout> {
    match self {
      WeakLayout::Sharded(store) => store.upgrade().map(Layout::Sharded),
      WeakLayout::Aggregated(store) => store.upgrade().map(Layout::Aggregated),
    }
  }
}

/// A store that persists entries under a directory.
///
/// Mutations land in an in-memory mirror first and are written out by
/// [`flush`](Store::flush), or automatically once `flush_delay` has passed
/// without further mutations. Read failures are reported as misses and write
/// failures are logged, so the disk never fails a cache operation.
pub struct DiskStore {
  dir: PathBuf,
  layout: Layout,
  flusher: Option<Arc<Debouncer>>,
}

impl DiskStore {
  /// Opens a store over `options.dir`. Nothing is read until first access.
  ///
  /// A `flush_delay` needs a Tokio runtime to schedule writes on.
  pub fn new(options: DiskOptions) -> Result<Self, BuildError> {
    if options.dir.as_os_str().is_empty() {
      return Err(BuildError::MissingDirectory);
    }
    let flusher = options
      .flush_delay
      .map(Debouncer::new)
      .transpose()?
      .map(Arc::new);
    let dir = options.dir.clone();
    let layout = if options.single_file {
      Layout::Aggregated(Arc::new(AggregatedStore::new(options)))
    } else {
      Layout::Sharded(Arc::new(ShardedStore::new(options)))
    };
    tracing::debug!(dir = %dir.display(), single_file = matches!(layout, Layout::Aggregated(_)), "opened disk store");
    Ok(Self {
      dir,
      layout,
      flusher,
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn schedule_flush(&self) {
    if let Some(flusher) = &self.flusher {
      schedule_flush(flusher, self.layout.downgrade());
    }
  }
}

/// Arms `flusher` to write `layout` out. A write that fails is retried after
/// another delay.
fn schedule_flush(flusher: &Arc<Debouncer>, layout: WeakLayout) {
  let retry = Arc::downgrade(flusher);
  flusher.schedule(move || async move {
    let Some(store) = layout.upgrade() else {
      return;
    };
    if !store.flush().await {
      if let Some(flusher) = retry.upgrade() {
        tracing::debug!(delay = ?flusher.delay(), "retrying failed disk flush");
        schedule_flush(&flusher, store.downgrade());
      }
    }
  });
}

impl Store for DiskStore {
  fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Arc<CacheEntry>>> {
    async move {
      match &self.layout {
        Layout::Sharded(store) => store.get(key).await,
        Layout::Aggregated(store) => store.get(key).await,
      }
    }
    .boxed()
  }

  fn put<'a>(&'a self, key: &'a str, entry: Arc<CacheEntry>) -> BoxFuture<'a, ()> {
    async move {
      match &self.layout {
        Layout::Sharded(store) => store.put(key, entry),
        Layout::Aggregated(store) => store.put(key, entry).await,
      }
      self.schedule_flush();
    }
    .boxed()
  }

  fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
    async move {
      match &self.layout {
        Layout::Sharded(store) => store.remove(key),
        Layout::Aggregated(store) => store.remove(key).await,
      }
      self.schedule_flush();
    }
    .boxed()
  }

  fn flush(&self) -> BoxFuture<'_, ()> {
    async move {
      if let Some(flusher) = &self.flusher {
        flusher.cancel();
      }
      if !self.layout.flush().await {
        self.schedule_flush();
      }
    }
    .boxed()
  }

  fn free(&self) {
    match &self.layout {
      Layout::Sharded(store) => store.free(),
      Layout::Aggregated(store) => store.free(),
    }
  }
}

impl fmt::Debug for DiskStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DiskStore")
      .field("dir", &self.dir)
      .field("single_file", &matches!(self.layout, Layout::Aggregated(_)))
      .field("flush_delay", &self.flusher.as_ref().map(|flusher| flusher.delay()))
      .finish()
  }
}
