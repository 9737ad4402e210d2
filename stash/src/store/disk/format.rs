//! How entries are turned into bytes on disk and back.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::EntryCodec;
use crate::entry::{CacheEntry, EntryMeta};
use crate::error::{CacheError, Result};
use crate::stream;
use crate::value::{ByteStream, Encoding, Reader, Value};

/// The payload type recorded next to a persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Kind {
  Text,
  Binary,
  Json,
}

impl Kind {
  fn of(encoding: Encoding) -> Self {
    match encoding {
      Encoding::Utf8 => Kind::Text,
      Encoding::Binary => Kind::Binary,
    }
  }

  pub(super) fn encoding(self) -> Encoding {
    match self {
      Kind::Binary => Encoding::Binary,
      Kind::Text | Kind::Json => Encoding::Utf8,
    }
  }
}

fn is_false(flag: &bool) -> bool {
  !*flag
}

/// The first line of a sharded entry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Header {
  pub key: String,
  pub kind: Kind,
  /// The payload is in codec form and needs a deserialize step.
  #[serde(default, skip_serializing_if = "is_false")]
  pub encoded: bool,
  #[serde(default)]
  pub meta: EntryMeta,
}

impl Header {
  /// The header as written to disk, including the trailing newline.
  pub(super) fn to_line(&self) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(self)?;
    line.push(b'\n');
    Ok(line)
  }
}

/// One entry of the aggregated `cache.json` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct Record {
  pub kind: Kind,
  #[serde(default, skip_serializing_if = "is_false")]
  pub encoded: bool,
  /// Text as a string, binary as base64, JSON inline.
  pub data: serde_json::Value,
  #[serde(default)]
  pub meta: EntryMeta,
}

pub(super) enum Body {
  Bytes(Bytes),
  Stream(ByteStream),
}

/// An entry ready to be written.
pub(super) struct Persisted {
  pub kind: Kind,
  pub encoded: bool,
  pub meta: EntryMeta,
  pub body: Body,
}

impl Persisted {
  pub(super) fn header(&self, key: &str) -> Header {
    Header {
      key: key.to_owned(),
      kind: self.kind,
      encoded: self.encoded,
      meta: self.meta,
    }
  }

  /// Drains the body and builds an aggregated-file record.
  pub(super) async fn into_record(self) -> Result<Record> {
    let bytes = match self.body {
      Body::Bytes(bytes) => bytes,
      Body::Stream(stream) => stream::collect(stream).await?,
    };
    let data = match self.kind {
      Kind::Binary => serde_json::Value::String(STANDARD.encode(&bytes)),
      Kind::Text => serde_json::Value::String(utf8(bytes)?),
      Kind::Json => serde_json::from_slice(&bytes)?,
    };
    Ok(Record {
      kind: self.kind,
      encoded: self.encoded,
      data,
      meta: self.meta,
    })
  }
}

fn utf8(bytes: Bytes) -> Result<String> {
  String::from_utf8(bytes.to_vec())
    .map_err(|_| CacheError::Codec("persisted text is not valid UTF-8".to_string()))
}

/// Decides how `entry` is written.
///
/// An entry that already carries a deserialize step is written in its raw
/// form. Otherwise a configured codec serializes materialized values, and
/// reader payloads are taken to be in codec form already. `reader_encoding`
/// overrides the encoding recorded for reader payloads.
pub(super) fn persist(
  entry: &CacheEntry,
  codec: Option<&Arc<dyn EntryCodec>>,
  reader_encoding: Option<Encoding>,
) -> Result<Persisted> {
  let meta = entry.meta();

  if let Some(reader) = entry.reader() {
    let encoding = reader_encoding.unwrap_or(reader.encoding());
    return Ok(Persisted {
      kind: Kind::of(encoding),
      encoded: entry.has_deserializer() || codec.is_some(),
      meta,
      body: Body::Stream(reader.open()),
    });
  }

  let value = entry.value().ok_or_else(|| CacheError::InvalidEntry {
    key: entry.key().to_owned(),
    reason: "entry has neither a value nor a reader",
  })?;

  if entry.has_deserializer() {
    return Ok(Persisted {
      kind: Kind::of(value.encoding()),
      encoded: true,
      meta,
      body: Body::Bytes(value.to_bytes()),
    });
  }

  if let Some(codec) = codec {
    return Ok(Persisted {
      kind: Kind::of(codec.encoding()),
      encoded: true,
      meta,
      body: Body::Bytes(codec.serialize(value)?),
    });
  }

  let kind = match value {
    Value::Text(_) => Kind::Text,
    Value::Binary(_) => Kind::Binary,
    Value::Json(_) => Kind::Json,
  };
  Ok(Persisted {
    kind,
    encoded: false,
    meta,
    body: Body::Bytes(value.to_bytes()),
  })
}

/// Where a restored payload comes from.
pub(super) enum Source {
  Bytes(Bytes),
  Reader(Reader),
}

/// Rebuilds an entry from its persisted parts. JSON payloads must be passed
/// as `Source::Bytes` unless they are in codec form.
pub(super) fn restore(
  key: &str,
  kind: Kind,
  encoded: bool,
  meta: EntryMeta,
  source: Source,
  codec: Option<&Arc<dyn EntryCodec>>,
) -> Result<CacheEntry> {
  let entry = CacheEntry::new(key).with_meta(meta);

  let entry = match source {
    Source::Reader(reader) => entry.with_reader(reader.with_encoding(kind.encoding())),
    Source::Bytes(bytes) => {
      let value = match kind {
        Kind::Binary => Value::Binary(bytes),
        Kind::Text => Value::Text(utf8(bytes)?),
        Kind::Json if encoded => Value::Text(utf8(bytes)?),
        Kind::Json => Value::Json(serde_json::from_slice(&bytes)?),
      };
      entry.with_value(value)
    }
  };

  match codec {
    Some(codec) if encoded => Ok(entry.with_deserializer(codec.clone())),
    _ => Ok(entry),
  }
}

/// Turns an aggregated-file record back into an entry.
pub(super) fn restore_record(
  key: &str,
  record: &Record,
  codec: Option<&Arc<dyn EntryCodec>>,
) -> Result<CacheEntry> {
  let bytes = match (record.kind, &record.data) {
    (Kind::Binary, serde_json::Value::String(encoded)) => STANDARD
      .decode(encoded)
      .map(Bytes::from)
      .map_err(|e| CacheError::Codec(e.to_string()))?,
    (Kind::Text, serde_json::Value::String(text)) => Bytes::from(text.clone()),
    (Kind::Json, json) => Bytes::from(serde_json::to_vec(json)?),
    _ => {
      return Err(CacheError::InvalidEntry {
        key: key.to_owned(),
        reason: "persisted data does not match its kind",
      })
    }
  };
  restore(key, record.kind, record.encoded, record.meta, Source::Bytes(bytes), codec)
}
