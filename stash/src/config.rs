//! Deserializable cache settings.
//!
//! `CacheConfigRaw` mirrors the keys a configuration file uses. Durations are
//! whole milliseconds; zero or a negative value disables the setting.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::builder::CacheBuilder;
use crate::error::BuildError;
use crate::store::DiskOptions;
use crate::value::Encoding;

fn default_true() -> bool {
  true
}

fn default_flush_delay() -> i64 {
  1000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheConfigRaw {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub time_to_live: i64,
  #[serde(default)]
  pub time_to_idle: i64,
  #[serde(default)]
  pub free_delay: i64,
  #[serde(default = "default_true")]
  pub read: bool,
  #[serde(default = "default_true")]
  pub write: bool,
  /// `"memory"` or `"disk"`. Defaults to memory.
  #[serde(default)]
  pub store: Option<String>,
  #[serde(default)]
  pub dir: Option<PathBuf>,
  #[serde(default)]
  pub single_file: bool,
  /// `"utf8"`, `"binary"` or null.
  #[serde(default)]
  pub encoding: Option<Encoding>,
  /// Negative means flush only when asked to.
  #[serde(default = "default_flush_delay")]
  pub flush_delay: i64,
}

impl Default for CacheConfigRaw {
  fn default() -> Self {
    Self {
      name: None,
      time_to_live: 0,
      time_to_idle: 0,
      free_delay: 0,
      read: true,
      write: true,
      store: None,
      dir: None,
      single_file: false,
      encoding: None,
      flush_delay: default_flush_delay(),
    }
  }
}

fn millis(value: i64) -> Duration {
  Duration::from_millis(value.max(0) as u64)
}

impl CacheConfigRaw {
  pub fn is_disk(&self) -> bool {
    self.store.as_deref() == Some("disk")
  }

  /// Validates the settings and turns them into a builder. Codec hooks cannot
  /// be expressed in configuration and are attached to the returned builder.
  pub fn into_builder(self) -> Result<CacheBuilder, BuildError> {
    let mut builder = CacheBuilder::new()
      .time_to_live(millis(self.time_to_live))
      .time_to_idle(millis(self.time_to_idle))
      .free_delay(millis(self.free_delay))
      .read(self.read)
      .write(self.write);
    if let Some(name) = self.name {
      builder = builder.name(name);
    }

    match self.store.as_deref() {
      None | Some("memory") => Ok(builder.memory_store()),
      Some("disk") => {
        let dir = self.dir.ok_or(BuildError::MissingDirectory)?;
        let flush_delay = (self.flush_delay >= 0).then(|| millis(self.flush_delay));
        let options = DiskOptions::new(dir)
          .single_file(self.single_file)
          .encoding(self.encoding)
          .flush_delay(flush_delay);
        Ok(builder.disk_store(options))
      }
      Some(other) => Err(BuildError::UnsupportedStore(other.to_string())),
    }
  }
}
