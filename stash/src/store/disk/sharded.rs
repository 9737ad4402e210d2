//! One file per key, fanned out by the first hex digit of the key's hash.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::HashMap;
use bytes::Bytes;
use futures_util::future::{BoxFuture, Shared};
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::OwnedMutexGuard;

use super::format::{self, Body, Header, Kind, Source};
use super::DiskOptions;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::stream;
use crate::value::Reader;

const ENTRY_EXT: &str = "entry";

type PendingRead = Shared<BoxFuture<'static, Option<Arc<CacheEntry>>>>;

#[derive(Default)]
struct State {
  entries: HashMap<String, Arc<CacheEntry>>,
  /// Keys whose mirror state has not reached disk yet, with the sequence
  /// number of their latest change. A dirty key missing from `entries` is a
  /// pending delete.
  dirty: HashMap<String, u64>,
  seq: u64,
}

/// FIFO locks handed out per key and dropped once nobody holds them.
#[derive(Default)]
struct KeyLocks {
  locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct KeyLockGuard<'a> {
  owner: &'a KeyLocks,
  key: String,
  lock: Arc<tokio::sync::Mutex<()>>,
  guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
  async fn lock(&self, key: &str) -> KeyLockGuard<'_> {
    let lock = self
      .locks
      .lock()
      .entry(key.to_owned())
      .or_default()
      .clone();
    let guard = lock.clone().lock_owned().await;
    KeyLockGuard {
      owner: self,
      key: key.to_owned(),
      lock,
      guard: Some(guard),
    }
  }
}

impl Drop for KeyLockGuard<'_> {
  fn drop(&mut self) {
    drop(self.guard.take());
    let mut locks = self.owner.locks.lock();
    // One reference in the map, one here: nobody else is queued.
    if Arc::strong_count(&self.lock) == 2 {
      locks.remove(&self.key);
    }
  }
}

pub(super) struct ShardedStore {
  dir: PathBuf,
  options: DiskOptions,
  state: Mutex<State>,
  key_locks: KeyLocks,
  reads: Mutex<HashMap<String, PendingRead>>,
  flush_lock: tokio::sync::Mutex<()>,
}

impl ShardedStore {
  pub(super) fn new(options: DiskOptions) -> Self {
    Self {
      dir: options.dir.clone(),
      options,
      state: Mutex::new(State::default()),
      key_locks: KeyLocks::default(),
      reads: Mutex::new(HashMap::default()),
      flush_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// `<dir>/<h[0]>/<h>.entry` where `h` is the hex SHA-256 of `key`.
  pub(super) fn path_for(&self, key: &str) -> PathBuf {
    let hash = hex::encode(Sha256::digest(key.as_bytes()));
    self
      .dir
      .join(&hash[..1])
      .join(format!("{hash}.{ENTRY_EXT}"))
  }

  pub(super) async fn get(self: &Arc<Self>, key: &str) -> Option<Arc<CacheEntry>> {
    {
      let state = self.state.lock();
      if let Some(entry) = state.entries.get(key) {
        return Some(entry.clone());
      }
      if state.dirty.contains_key(key) {
        return None;
      }
    }

    let pending = self
      .reads
      .lock()
      .entry(key.to_owned())
      .or_insert_with(|| {
        // The load runs as its own task so a caller that gives up on `get`
        // cannot strand the key lock it takes.
        let this = self.clone();
        let key = key.to_owned();
        let load = tokio::spawn(async move { this.load(key).await });
        async move { load.await.ok().flatten() }.boxed().shared()
      })
      .clone();
    pending.await
  }

  /// Reads `key` from disk and merges it into the mirror. Runs at most once
  /// at a time per key; concurrent `get`s share the result. A pending write
  /// for the key wins over what is read.
  async fn load(&self, key: String) -> Option<Arc<CacheEntry>> {
    let _lock = self.key_locks.lock(&key).await;
    let path = self.path_for(&key);

    let loaded = match self.read_file(&key, &path).await {
      Ok(found) => found.map(Arc::new),
      Err(e) => {
        tracing::debug!(key = %key, path = %path.display(), error = %e, "disk read failed, treating as miss");
        None
      }
    };

    let result = {
      let mut state = self.state.lock();
      if !state.dirty.contains_key(&key) && !state.entries.contains_key(&key) {
        if let Some(entry) = &loaded {
          state.entries.insert(key.clone(), entry.clone());
        }
      }
      state.entries.get(&key).cloned()
    };

    self.reads.lock().remove(&key);
    result
  }

  async fn read_file(&self, key: &str, path: &Path) -> Result<Option<CacheEntry>> {
    let file = match tokio::fs::File::open(path).await {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line.last() != Some(&b'\n') {
      return Ok(None);
    }
    let header: Header = serde_json::from_slice(&line[..line.len() - 1])?;
    if header.key != key {
      tracing::debug!(key, stored = %header.key, "hash collision on disk, treating as miss");
      return Ok(None);
    }

    let codec = self.options.codec.as_ref();
    let source = if header.kind == Kind::Json && !header.encoded {
      let mut payload = Vec::new();
      reader.read_to_end(&mut payload).await?;
      Source::Bytes(Bytes::from(payload))
    } else {
      Source::Reader(payload_reader(path.to_path_buf(), Bytes::from(line)))
    };

    format::restore(key, header.kind, header.encoded, header.meta, source, codec).map(Some)
  }

  pub(super) fn put(&self, key: &str, entry: Arc<CacheEntry>) {
    let mut state = self.state.lock();
    state.seq += 1;
    let seq = state.seq;
    state.entries.insert(key.to_owned(), entry);
    state.dirty.insert(key.to_owned(), seq);
  }

  pub(super) fn remove(&self, key: &str) {
    let mut state = self.state.lock();
    state.seq += 1;
    let seq = state.seq;
    state.entries.remove(key);
    state.dirty.insert(key.to_owned(), seq);
  }

  /// Writes every dirty key. A key stays dirty until its write succeeds, so a
  /// concurrent `free` never lets a reader see the file before it is written
  /// and a failed write is retried by the next flush. Returns `false` if any
  /// key could not be written.
  pub(super) async fn flush(&self) -> bool {
    let _flush = self.flush_lock.lock().await;

    let keys: Vec<String> = self.state.lock().dirty.keys().cloned().collect();
    if keys.is_empty() {
      return true;
    }
    tracing::debug!(dir = %self.dir.display(), keys = keys.len(), "flushing sharded disk store");

    let mut failed = 0usize;
    for key in keys {
      let _lock = self.key_locks.lock(&key).await;
      let (entry, seq) = {
        let state = self.state.lock();
        match state.dirty.get(&key) {
          Some(seq) => (state.entries.get(&key).cloned(), *seq),
          None => continue,
        }
      };

      let path = self.path_for(&key);
      let outcome = match &entry {
        Some(entry) => self.write_file(&key, entry, &path).await,
        None => remove_file(&path).await,
      };
      if let Err(e) = outcome {
        tracing::error!(key = %key, path = %path.display(), error = %e, "failed to persist cache entry");
        failed += 1;
        continue;
      }

      let mut state = self.state.lock();
      if state.dirty.get(&key) == Some(&seq) {
        state.dirty.remove(&key);
      }
    }
    failed == 0
  }

  async fn write_file(&self, key: &str, entry: &CacheEntry, path: &Path) -> Result<()> {
    let persisted = format::persist(entry, self.options.codec.as_ref(), self.options.encoding)?;
    let header = persisted.header(key).to_line()?;

    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("{ENTRY_EXT}.tmp"));
    let written = async {
      let mut file = tokio::fs::File::create(&tmp).await?;
      file.write_all(&header).await?;
      match persisted.body {
        Body::Bytes(bytes) => file.write_all(&bytes).await?,
        Body::Stream(mut chunks) => {
          while let Some(chunk) = chunks.next().await {
            file.write_all(&chunk?).await?;
          }
        }
      }
      file.flush().await?;
      file.sync_all().await
    }
    .await;

    if let Err(e) = written {
      let _ = tokio::fs::remove_file(&tmp).await;
      return Err(e.into());
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
  }

  /// Drops mirror entries that are already on disk.
  pub(super) fn free(&self) {
    let mut state = self.state.lock();
    let State { entries, dirty, .. } = &mut *state;
    let before = entries.len();
    entries.retain(|key, _| dirty.contains_key(key));
    tracing::info!(dir = %self.dir.display(), dropped = before - entries.len(), "freed sharded disk mirror");
  }
}

async fn remove_file(path: &Path) -> Result<()> {
  match tokio::fs::remove_file(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}

/// A lazy reader over the payload that follows `header` in `path`.
///
/// Each stream re-checks the header before yielding anything, so a file that
/// was rewritten after the entry was loaded fails instead of mixing contents.
fn payload_reader(path: PathBuf, header: Bytes) -> Reader {
  Reader::new(move || {
    let path = path.clone();
    let header = header.clone();
    stream::open_stream(async move {
      let mut file = tokio::fs::File::open(&path).await?;
      let mut found = vec![0u8; header.len()];
      file.read_exact(&mut found).await?;
      if found != header {
        return Err(io::Error::new(
          io::ErrorKind::InvalidData,
          "cache entry was rewritten while it was being read",
        ));
      }
      Ok(file)
    })
  })
}
