//! Serialize/deserialize hooks applied between materialized values and their
//! persisted byte form.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{CacheError, Result};
use crate::stream;
use crate::value::{Encoding, Reader, Value};

/// A serialize/deserialize hook pair.
///
/// `deserialize` receives a stream factory rather than bytes so that an
/// implementation can parse incrementally without buffering the payload.
pub trait EntryCodec: Send + Sync + 'static {
  /// Turns a materialized value into its persisted bytes.
  fn serialize(&self, value: &Value) -> Result<Bytes>;

  /// Reconstructs a value from its persisted bytes.
  fn deserialize(&self, reader: Reader) -> BoxFuture<'static, Result<Value>>;

  /// The encoding of the bytes `serialize` produces.
  fn encoding(&self) -> Encoding {
    Encoding::Utf8
  }
}

/// Stores values as JSON documents and reads them back as `Value::Json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntryCodec for JsonCodec {
  fn serialize(&self, value: &Value) -> Result<Bytes> {
    let json = match value {
      Value::Json(json) => serde_json::to_vec(json)?,
      Value::Text(text) => serde_json::to_vec(text)?,
      Value::Binary(_) => {
        return Err(CacheError::Codec(
          "binary values cannot be encoded as JSON".to_string(),
        ))
      }
    };
    Ok(Bytes::from(json))
  }

  fn deserialize(&self, reader: Reader) -> BoxFuture<'static, Result<Value>> {
    async move {
      let bytes = stream::collect(reader.open()).await?;
      let json: serde_json::Value = serde_json::from_slice(&bytes)?;
      Ok(Value::Json(json))
    }
    .boxed()
  }
}
