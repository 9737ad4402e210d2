//! The payload types a cache entry can carry.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::stream;

/// A boxed stream of byte chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A materialized cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Text(String),
  Binary(Bytes),
  /// An arbitrary structured value.
  Json(serde_json::Value),
}

impl Value {
  /// Returns the value's byte representation. Structured values are rendered
  /// as JSON.
  pub fn to_bytes(&self) -> Bytes {
    match self {
      Value::Text(text) => Bytes::from(text.clone()),
      Value::Binary(bytes) => bytes.clone(),
      Value::Json(json) => Bytes::from(json.to_string()),
    }
  }

  /// Returns the text if this is a `Value::Text`.
  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Text(text) => Some(text),
      _ => None,
    }
  }

  /// Returns the raw bytes if this is a `Value::Binary`.
  pub fn as_binary(&self) -> Option<&Bytes> {
    match self {
      Value::Binary(bytes) => Some(bytes),
      _ => None,
    }
  }

  /// Returns the structured value if this is a `Value::Json`.
  pub fn as_json(&self) -> Option<&serde_json::Value> {
    match self {
      Value::Json(json) => Some(json),
      _ => None,
    }
  }

  /// The encoding a stream over this value naturally has.
  pub(crate) fn encoding(&self) -> Encoding {
    match self {
      Value::Binary(_) => Encoding::Binary,
      Value::Text(_) | Value::Json(_) => Encoding::Utf8,
    }
  }
}

impl From<String> for Value {
  fn from(text: String) -> Self {
    Value::Text(text)
  }
}

impl From<&str> for Value {
  fn from(text: &str) -> Self {
    Value::Text(text.to_owned())
  }
}

impl From<Bytes> for Value {
  fn from(bytes: Bytes) -> Self {
    Value::Binary(bytes)
  }
}

impl From<Vec<u8>> for Value {
  fn from(bytes: Vec<u8>) -> Self {
    Value::Binary(Bytes::from(bytes))
  }
}

impl From<serde_json::Value> for Value {
  fn from(json: serde_json::Value) -> Self {
    Value::Json(json)
  }
}

/// How drained stream bytes are turned back into a `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
  /// Chunks are UTF-8 text; draining yields `Value::Text`.
  Utf8,
  /// Chunks are opaque bytes; draining yields `Value::Binary`.
  #[default]
  Binary,
}

type ReaderFn = dyn Fn() -> ByteStream + Send + Sync;

/// A factory for fresh byte streams over a payload that is not held in memory.
#[derive(Clone)]
pub struct Reader {
  open: Arc<ReaderFn>,
  encoding: Encoding,
}

impl Reader {
  /// Creates a reader from a closure. Each call must return a new stream
  /// starting at the beginning of the payload.
  pub fn new<F>(open: F) -> Self
  where
    F: Fn() -> ByteStream + Send + Sync + 'static,
  {
    Self {
      open: Arc::new(open),
      encoding: Encoding::Binary,
    }
  }

  /// A reader over the contents of a file, opened lazily on first poll.
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    Self::new(move || stream::file_stream(path.clone(), 0))
  }

  /// A reader that replays the same in-memory bytes.
  pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
    let bytes = bytes.into();
    Self::new(move || stream::once(bytes.clone()))
  }

  /// Declares the encoding of the bytes this reader produces.
  pub fn with_encoding(mut self, encoding: Encoding) -> Self {
    self.encoding = encoding;
    self
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  /// Opens a new stream.
  pub fn open(&self) -> ByteStream {
    (self.open)()
  }
}

impl fmt::Debug for Reader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Reader")
      .field("encoding", &self.encoding)
      .finish_non_exhaustive()
  }
}

/// What `Cache::put` stores under a key.
#[derive(Debug, Clone, Default)]
pub enum Payload {
  Value(Value),
  /// A streaming producer, stored instead of a materialized value.
  Reader(Reader),
  /// Nothing. Putting an empty payload removes the key.
  #[default]
  Empty,
}

impl From<Value> for Payload {
  fn from(value: Value) -> Self {
    Payload::Value(value)
  }
}

macro_rules! payload_from_value {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for Payload {
        fn from(value: $ty) -> Self {
          Payload::Value(Value::from(value))
        }
      }
    )*
  };
}

payload_from_value!(String, &str, Bytes, Vec<u8>, serde_json::Value);

impl From<Reader> for Payload {
  fn from(reader: Reader) -> Self {
    Payload::Reader(reader)
  }
}

impl From<Option<Value>> for Payload {
  fn from(value: Option<Value>) -> Self {
    value.map_or(Payload::Empty, Payload::Value)
  }
}
