//! Storage backends behind a [`Cache`](crate::Cache).

mod disk;
mod memory;

pub use disk::{DiskOptions, DiskStore};
pub use memory::MemoryStore;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::entry::CacheEntry;

/// A key to entry mapping that a cache reads from and writes to.
///
/// Implementations may be volatile or durable. The cache only relies on this
/// trait, so stores are interchangeable.
pub trait Store: Send + Sync + 'static {
  /// Looks up the entry for `key`. Backends that fail to read must report a
  /// miss rather than an error.
  fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Arc<CacheEntry>>>;

  /// Stores `entry` under `key`. Once this resolves, a `get` for the same key
  /// observes the new entry.
  fn put<'a>(&'a self, key: &'a str, entry: Arc<CacheEntry>) -> BoxFuture<'a, ()>;

  fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;

  /// Persists any buffered state. Resolves once the state is written, even if
  /// writing failed.
  fn flush(&self) -> BoxFuture<'_, ()>;

  /// Drops in-memory state that can be reconstructed later.
  fn free(&self);
}
