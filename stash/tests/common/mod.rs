#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fibre_stash::{
  BoxError, Cache, CacheBuilder, DiskOptions, DiskStore, EntryCodec, GetOptions, JsonCodec, Reader,
  Store, Value,
};
use futures_util::future::BoxFuture;

/// The text payload used by the large-reader tests: "abc" repeated 5000 times.
pub fn large_text() -> String {
  "abc".repeat(5000)
}

pub fn memory_cache() -> Cache {
  CacheBuilder::new().build().unwrap()
}

/// A disk store that only writes when flushed.
pub fn disk_store(dir: &Path, single_file: bool) -> DiskStore {
  DiskStore::new(DiskOptions::new(dir).single_file(single_file).flush_delay(None)).unwrap()
}

/// Options with a builder that counts its invocations and sleeps before
/// producing `value`.
pub fn counting_builder(count: &Arc<AtomicUsize>, value: &'static str, delay: Duration) -> GetOptions {
  let count = count.clone();
  GetOptions::new().builder(move || async move {
    count.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    Ok::<_, BoxError>(value)
  })
}

pub async fn read_text(store: &dyn Store, key: &str) -> Option<String> {
  let entry = store.get(key).await?;
  match entry.read_value().await.unwrap() {
    Value::Text(text) => Some(text),
    other => panic!("expected text for {key}, got {other:?}"),
  }
}

/// A JSON codec that counts how often each hook runs.
#[derive(Debug, Default)]
pub struct CountingCodec {
  pub serialized: AtomicUsize,
  pub deserialized: AtomicUsize,
}

impl EntryCodec for CountingCodec {
  fn serialize(&self, value: &Value) -> fibre_stash::Result<Bytes> {
    self.serialized.fetch_add(1, Ordering::SeqCst);
    JsonCodec.serialize(value)
  }

  fn deserialize(&self, reader: Reader) -> BoxFuture<'static, fibre_stash::Result<Value>> {
    self.deserialized.fetch_add(1, Ordering::SeqCst);
    JsonCodec.deserialize(reader)
  }
}
