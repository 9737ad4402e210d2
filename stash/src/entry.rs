use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::codec::EntryCodec;
use crate::error::{CacheError, Result};
use crate::stream;
use crate::value::{ByteStream, Encoding, Reader, Value};

/// Metadata persisted alongside an entry.
///
/// Timestamps are Unix milliseconds. `last_modified` is a caller-defined
/// version stamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_accessed: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<u64>,
}

/// A value stored in the cache.
///
/// An entry holds either a materialized `Value` or a `Reader` that produces
/// the payload as a stream. An entry may also carry a deserialize step, in
/// which case its value or reader holds the persisted form and
/// [`read_value`](Self::read_value) applies the step once and memoizes the
/// result.
pub struct CacheEntry {
  key: String,
  value: Option<Value>,
  reader: Option<Reader>,
  codec: Option<Arc<dyn EntryCodec>>,
  deserialized: OnceCell<Value>,
  meta: Mutex<EntryMeta>,
}

impl CacheEntry {
  /// Creates an empty entry for `key`.
  pub fn new(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      value: None,
      reader: None,
      codec: None,
      deserialized: OnceCell::new(),
      meta: Mutex::new(EntryMeta::default()),
    }
  }

  pub fn with_value(mut self, value: impl Into<Value>) -> Self {
    self.value = Some(value.into());
    self.reader = None;
    self
  }

  pub fn with_reader(mut self, reader: Reader) -> Self {
    self.reader = Some(reader);
    self.value = None;
    self
  }

  /// Attaches a deserialize step. The entry's value or reader is then
  /// treated as the serialized form.
  pub fn with_deserializer(mut self, codec: Arc<dyn EntryCodec>) -> Self {
    self.codec = Some(codec);
    self
  }

  pub fn with_meta(self, meta: EntryMeta) -> Self {
    *self.meta.lock() = meta;
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// The materialized value as stored, before any deserialize step.
  pub fn value(&self) -> Option<&Value> {
    self.value.as_ref()
  }

  pub fn reader(&self) -> Option<&Reader> {
    self.reader.as_ref()
  }

  pub fn has_deserializer(&self) -> bool {
    self.codec.is_some()
  }

  /// `true` once the deserialize step has run, or if there is none.
  pub fn is_deserialized(&self) -> bool {
    self.codec.is_none() || self.deserialized.initialized()
  }

  pub fn meta(&self) -> EntryMeta {
    *self.meta.lock()
  }

  pub(crate) fn touch(&self, now: u64) {
    self.meta.lock().last_accessed = Some(now);
  }

  /// The encoding of the bytes a stream over this entry yields.
  pub fn encoding(&self) -> Encoding {
    match (&self.value, &self.reader) {
      (Some(value), _) => value.encoding(),
      (None, Some(reader)) => reader.encoding(),
      (None, None) => Encoding::Binary,
    }
  }

  /// Returns the materialized value.
  ///
  /// With a deserialize step the step runs at most once and its result is
  /// memoized. Without one, a reader-backed entry is drained into memory on
  /// every call; the drained bytes are not kept.
  pub async fn read_value(&self) -> Result<Value> {
    if let Some(codec) = &self.codec {
      let value = self
        .deserialized
        .get_or_try_init(|| async {
          let reader = match (&self.value, &self.reader) {
            (Some(raw), _) => Reader::from_bytes(raw.to_bytes()).with_encoding(raw.encoding()),
            (None, Some(reader)) => reader.clone(),
            (None, None) => return Err(self.illegal_state()),
          };
          codec.deserialize(reader).await
        })
        .await?;
      return Ok(value.clone());
    }

    if let Some(value) = &self.value {
      return Ok(value.clone());
    }

    match &self.reader {
      Some(reader) => Ok(stream::drain(reader.open(), reader.encoding()).await?),
      None => Err(self.illegal_state()),
    }
  }

  /// Returns a stream over the entry's payload without materializing it.
  ///
  /// Fails for entries with a deserialize step, since streaming and
  /// deserializing are exclusive access modes.
  pub fn create_read_stream(&self) -> Result<ByteStream> {
    if self.codec.is_some() {
      return Err(CacheError::InvalidEntry {
        key: self.key.clone(),
        reason: "a read stream cannot be created for an entry with a deserialize step",
      });
    }

    match (&self.value, &self.reader) {
      (Some(value), _) => Ok(stream::once(value.to_bytes())),
      (None, Some(reader)) => Ok(reader.open()),
      (None, None) => Err(self.illegal_state()),
    }
  }

  fn illegal_state(&self) -> CacheError {
    CacheError::InvalidEntry {
      key: self.key.clone(),
      reason: "entry has neither a value nor a reader",
    }
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("has_value", &self.value.is_some())
      .field("has_reader", &self.reader.is_some())
      .field("deserialized", &self.is_deserialized())
      .field("meta", &self.meta())
      .finish()
  }
}
