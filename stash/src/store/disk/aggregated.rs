//! The whole cache in one `cache.json`, mirrored in memory.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;

use super::format::{self, Record};
use super::DiskOptions;
use crate::entry::CacheEntry;
use crate::error::Result;

pub(super) const FILE_NAME: &str = "cache.json";

struct Slot {
  entry: Arc<CacheEntry>,
  /// The persisted form of `entry`, once known.
  record: Option<Arc<Record>>,
}

struct Loaded {
  slots: HashMap<String, Slot>,
  /// Bumped on every mutation.
  version: u64,
  /// The `version` that is on disk.
  persisted: u64,
}

impl Loaded {
  fn is_clean(&self) -> bool {
    self.version == self.persisted
  }
}

enum Mirror {
  Unloaded,
  Loaded(Loaded),
}

pub(super) struct AggregatedStore {
  file: PathBuf,
  options: DiskOptions,
  mirror: Mutex<Mirror>,
  load_lock: tokio::sync::Mutex<()>,
  write_lock: tokio::sync::Mutex<()>,
}

impl AggregatedStore {
  pub(super) fn new(options: DiskOptions) -> Self {
    Self {
      file: options.dir.join(FILE_NAME),
      options,
      mirror: Mutex::new(Mirror::Unloaded),
      load_lock: tokio::sync::Mutex::new(()),
      write_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Runs `f` against the loaded mirror, reading the file first if needed.
  async fn with_loaded<T>(&self, f: impl FnOnce(&mut Loaded) -> T) -> T {
    loop {
      if let Mirror::Loaded(loaded) = &mut *self.mirror.lock() {
        return f(loaded);
      }
      self.load().await;
    }
  }

  async fn load(&self) {
    let _gate = self.load_lock.lock().await;
    if let Mirror::Loaded(_) = &*self.mirror.lock() {
      return;
    }

    let slots = match self.read_file().await {
      Ok(slots) => slots,
      Err(e) => {
        tracing::debug!(file = %self.file.display(), error = %e, "failed to read aggregated cache file, starting empty");
        HashMap::default()
      }
    };
    tracing::debug!(file = %self.file.display(), entries = slots.len(), "loaded aggregated cache file");

    let mut mirror = self.mirror.lock();
    if let Mirror::Unloaded = &*mirror {
      *mirror = Mirror::Loaded(Loaded {
        slots,
        version: 0,
        persisted: 0,
      });
    }
  }

  async fn read_file(&self) -> Result<HashMap<String, Slot>> {
    let bytes = match tokio::fs::read(&self.file).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::default()),
      Err(e) => return Err(e.into()),
    };
    let records: HashMap<String, Record> = serde_json::from_slice(&bytes)?;

    let codec = self.options.codec.as_ref();
    let mut slots = HashMap::default();
    for (key, record) in records {
      match format::restore_record(&key, &record, codec) {
        Ok(entry) => {
          slots.insert(
            key,
            Slot {
              entry: Arc::new(entry),
              record: Some(Arc::new(record)),
            },
          );
        }
        Err(e) => tracing::debug!(key = %key, error = %e, "skipping unreadable persisted entry"),
      }
    }
    Ok(slots)
  }

  pub(super) async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
    self
      .with_loaded(|loaded| loaded.slots.get(key).map(|slot| slot.entry.clone()))
      .await
  }

  pub(super) async fn put(&self, key: &str, entry: Arc<CacheEntry>) {
    self
      .with_loaded(|loaded| {
        loaded
          .slots
          .insert(key.to_owned(), Slot { entry, record: None });
        loaded.version += 1;
      })
      .await
  }

  pub(super) async fn remove(&self, key: &str) {
    self
      .with_loaded(|loaded| {
        if loaded.slots.remove(key).is_some() {
          loaded.version += 1;
        }
      })
      .await
  }

  /// Writes the whole mirror if it changed since the last write. Returns
  /// `false` if the file could not be written.
  pub(super) async fn flush(&self) -> bool {
    let _write = self.write_lock.lock().await;

    let (version, snapshot) = {
      let mirror = self.mirror.lock();
      let loaded = match &*mirror {
        Mirror::Loaded(loaded) if !loaded.is_clean() => loaded,
        _ => return true,
      };
      let snapshot: Vec<(String, Arc<CacheEntry>, Option<Arc<Record>>)> = loaded
        .slots
        .iter()
        .map(|(key, slot)| (key.clone(), slot.entry.clone(), slot.record.clone()))
        .collect();
      (loaded.version, snapshot)
    };

    // Reader-backed entries are drained here.
    let mut records = Vec::with_capacity(snapshot.len());
    for (key, entry, record) in snapshot {
      let record = match record {
        Some(record) => record,
        None => match self.encode(&entry).await {
          Ok(record) => Arc::new(record),
          Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to encode cache entry, leaving it out of the file");
            continue;
          }
        },
      };
      records.push((key, entry, record));
    }

    let written = match self.write_file(&records).await {
      Ok(()) => {
        tracing::info!(file = %self.file.display(), entries = records.len(), "persisted aggregated cache file");
        true
      }
      Err(e) => {
        tracing::error!(file = %self.file.display(), error = %e, "failed to write aggregated cache file");
        false
      }
    };

    let mut mirror = self.mirror.lock();
    if let Mirror::Loaded(loaded) = &mut *mirror {
      for (key, entry, record) in records {
        if let Some(slot) = loaded.slots.get_mut(&key) {
          if Arc::ptr_eq(&slot.entry, &entry) {
            slot.record = Some(record);
          }
        }
      }
      // After a failed write the mirror stays dirty and cannot be freed.
      if written {
        loaded.persisted = version;
      }
    }
    written
  }

  async fn encode(&self, entry: &CacheEntry) -> Result<Record> {
    format::persist(entry, self.options.codec.as_ref(), self.options.encoding)?
      .into_record()
      .await
  }

  async fn write_file(&self, records: &[(String, Arc<CacheEntry>, Arc<Record>)]) -> Result<()> {
    let map: BTreeMap<&str, &Record> = records
      .iter()
      .map(|(key, _, record)| (key.as_str(), record.as_ref()))
      .collect();
    let json = serde_json::to_vec(&map)?;

    tokio::fs::create_dir_all(&self.options.dir).await?;
    let tmp = self.file.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, &self.file).await?;
    Ok(())
  }

  /// Drops the mirror if everything in it is on disk. It is reloaded on the
  /// next access.
  pub(super) fn free(&self) {
    let mut mirror = self.mirror.lock();
    let clean = match &*mirror {
      Mirror::Loaded(loaded) => loaded.is_clean(),
      Mirror::Unloaded => false,
    };
    if clean {
      *mirror = Mirror::Unloaded;
      tracing::info!(file = %self.file.display(), "freed aggregated disk mirror");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::Value;

  fn store(dir: &std::path::Path) -> AggregatedStore {
    AggregatedStore::new(DiskOptions::new(dir).single_file(true).flush_delay(None))
  }

  #[tokio::test]
  async fn unreadable_file_loads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(FILE_NAME), b"not json").unwrap();
    let store = store(dir.path());
    assert!(store.get("anything").await.is_none());
  }

  #[tokio::test]
  async fn free_keeps_dirty_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store
      .put("k", Arc::new(CacheEntry::new("k").with_value("v")))
      .await;
    store.free();
    assert!(store.get("k").await.is_some());

    store.flush().await;
    store.free();
    assert!(matches!(*store.mirror.lock(), Mirror::Unloaded));
    let entry = store.get("k").await.unwrap();
    assert_eq!(entry.value(), Some(&Value::Text("v".into())));
  }

  #[tokio::test]
  async fn clean_flush_does_not_touch_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.flush().await;
    assert!(!dir.path().join(FILE_NAME).exists());
  }
}
