use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The error type shared by builder closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by cache operations.
///
/// The type is `Clone` so that a single failed build can be handed to every
/// caller that was waiting on the same key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The builder for `key` failed. Nothing was written to the store.
  #[error("builder for key \"{key}\" failed: {source}")]
  BuildFailed {
    key: String,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
  },

  /// An entry was accessed in a way its state does not allow, such as
  /// streaming an entry that has a deserialize step.
  #[error("invalid cache entry \"{key}\": {reason}")]
  InvalidEntry { key: String, reason: &'static str },

  /// A read stream was requested but no fresh entry exists for the key.
  #[error("unable to create read stream for \"{key}\": invalid cache entry")]
  StreamUnavailable { key: String },

  /// A serialize or deserialize hook failed.
  #[error("codec error: {0}")]
  Codec(String),

  #[error("i/o error: {0}")]
  Io(Arc<io::Error>),
}

impl From<io::Error> for CacheError {
  fn from(err: io::Error) -> Self {
    CacheError::Io(Arc::new(err))
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(err: serde_json::Error) -> Self {
    CacheError::Codec(err.to_string())
  }
}

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A disk store was requested without a directory to persist into.
  #[error("a disk store requires a directory")]
  MissingDirectory,

  /// The configured store name is not one of `memory` or `disk`.
  #[error("unsupported store type: {0}")]
  UnsupportedStore(String),

  /// A `free_delay` or disk `flush_delay` was configured outside of a Tokio
  /// runtime, so the debounced timers cannot be spawned.
  #[error("a debounced timer was configured but no tokio runtime is available")]
  RuntimeRequired,
}

/// A specialized `Result` type for cache operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
