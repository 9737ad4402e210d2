//! A name-keyed registry of caches built from configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::config::CacheConfigRaw;
use crate::error::BuildError;
use crate::handles::Cache;

const DEFAULT_BASE_DIR: &str = ".cache";

/// Replaces every character that is not safe in a file name with `-`.
pub fn safe_file_name(name: &str) -> String {
  name
    .chars()
    .map(|c| match c {
      'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' | '.' => c,
      _ => '-',
    })
    .collect()
}

/// Holds named caches and creates them on first use.
///
/// Disk caches configured without a `dir` are placed under
/// `<base_dir>/<name>`.
pub struct CacheManager {
  base_dir: PathBuf,
  caches: DashMap<String, Cache>,
}

impl CacheManager {
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_dir: base_dir.into(),
      caches: DashMap::new(),
    }
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  /// Returns the cache registered under `name`, building it from `config` if
  /// there is none. An existing cache is returned as is; `config` is ignored.
  pub fn get_or_create(&self, name: &str, config: CacheConfigRaw) -> Result<Cache, BuildError> {
    if let Some(cache) = self.caches.get(name) {
      return Ok(cache.value().clone());
    }

    match self.caches.entry(name.to_owned()) {
      Entry::Occupied(existing) => Ok(existing.get().clone()),
      Entry::Vacant(slot) => {
        let cache = self.build(name, config)?;
        tracing::debug!(cache = %name, "registered cache");
        slot.insert(cache.clone());
        Ok(cache)
      }
    }
  }

  fn build(&self, name: &str, mut config: CacheConfigRaw) -> Result<Cache, BuildError> {
    if config.name.is_none() {
      config.name = Some(name.to_owned());
    }
    if config.is_disk() && config.dir.is_none() {
      config.dir = Some(self.base_dir.join(safe_file_name(name)));
    }
    config.into_builder()?.build()
  }

  pub fn get(&self, name: &str) -> Option<Cache> {
    self.caches.get(name).map(|cache| cache.value().clone())
  }

  pub fn for_each(&self, mut f: impl FnMut(&str, &Cache)) {
    for entry in self.caches.iter() {
      f(entry.key(), entry.value());
    }
  }

  /// Flushes every registered cache and waits for all of them.
  pub async fn flush_all(&self) {
    let caches: Vec<Cache> = self.caches.iter().map(|entry| entry.value().clone()).collect();
    futures_util::future::join_all(caches.iter().map(|cache| cache.flush())).await;
  }

  /// Forgets every registered cache. Caches still held elsewhere keep working.
  pub fn clear(&self) {
    self.caches.clear();
  }

  pub fn len(&self) -> usize {
    self.caches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.caches.is_empty()
  }
}

impl Default for CacheManager {
  fn default() -> Self {
    Self::new(DEFAULT_BASE_DIR)
  }
}

impl std::fmt::Debug for CacheManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheManager")
      .field("base_dir", &self.base_dir)
      .field("caches", &self.caches.len())
      .finish()
  }
}

// --- Process-wide Manager ---

static GLOBAL_MANAGER: Lazy<RwLock<Arc<CacheManager>>> =
  Lazy::new(|| RwLock::new(Arc::new(CacheManager::default())));

/// The process-wide manager. Until [`init`] is called it places disk caches
/// under `.cache` in the working directory.
pub fn global() -> Arc<CacheManager> {
  GLOBAL_MANAGER.read().clone()
}

/// Installs a fresh process-wide manager rooted at `base_dir` and returns it.
pub fn init(base_dir: impl Into<PathBuf>) -> Arc<CacheManager> {
  let manager = Arc::new(CacheManager::new(base_dir));
  *GLOBAL_MANAGER.write() = manager.clone();
  manager
}

/// Drops every cache registered with the process-wide manager and restores
/// the default one.
pub fn reset() {
  let previous = std::mem::replace(
    &mut *GLOBAL_MANAGER.write(),
    Arc::new(CacheManager::default()),
  );
  previous.clear();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unsafe_characters_are_replaced() {
    assert_eq!(safe_file_name("pages/home page:v1"), "pages-home-page-v1");
    assert_eq!(safe_file_name("ok_name-1.2"), "ok_name-1.2");
  }
}
