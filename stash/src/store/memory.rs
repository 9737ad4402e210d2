use std::sync::Arc;

use ahash::HashMap;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;

use super::Store;
use crate::entry::CacheEntry;

/// A volatile in-process store.
///
/// Nothing is persisted; `free` discards every entry and `flush` has nothing
/// to do.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }
}

impl Store for MemoryStore {
  fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Arc<CacheEntry>>> {
    future::ready(self.entries.lock().get(key).cloned()).boxed()
  }

  fn put<'a>(&'a self, key: &'a str, entry: Arc<CacheEntry>) -> BoxFuture<'a, ()> {
    self.entries.lock().insert(key.to_owned(), entry);
    future::ready(()).boxed()
  }

  fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
    self.entries.lock().remove(key);
    future::ready(()).boxed()
  }

  fn flush(&self) -> BoxFuture<'_, ()> {
    future::ready(()).boxed()
  }

  fn free(&self) {
    self.entries.lock().clear();
  }
}
