mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::counting_builder;
use fibre_stash::{CacheBuilder, DiskOptions, GetOptions, JsonCodec, PutOptions, Value};
use serde_json::json;
use tempfile::tempdir;
use tokio::time::Duration;

fn disk_options(dir: &std::path::Path, single_file: bool) -> DiskOptions {
  DiskOptions::new(dir).single_file(single_file).flush_delay(None)
}

#[tokio::test]
async fn test_versioned_entries_survive_restart() {
  for single_file in [false, true] {
    let dir = tempdir().unwrap();
    let cache = CacheBuilder::new()
      .name("pages")
      .disk_store(disk_options(dir.path(), single_file))
      .build()
      .unwrap();
    cache.put_with("home", "<h1>home</h1>", PutOptions::last_modified(4)).await;
    cache.flush().await;
    drop(cache);

    let restarted = CacheBuilder::new()
      .disk_store(disk_options(dir.path(), single_file))
      .build()
      .unwrap();
    let entry = restarted
      .get_entry("home", GetOptions::new().last_modified(4))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(entry.read_value().await.unwrap(), Value::Text("<h1>home</h1>".into()));
    assert_eq!(entry.meta().last_modified, Some(4));

    // A newer version known to the caller makes the persisted copy stale.
    assert!(!restarted.contains("home", Some(5)).await.unwrap());
  }
}

#[tokio::test]
async fn test_built_values_are_persisted() {
  let dir = tempdir().unwrap();
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = CacheBuilder::new()
    .disk_store(disk_options(dir.path(), false))
    .build()
    .unwrap();

  let options = counting_builder(&build_count, "expensive", Duration::ZERO);
  assert_eq!(
    cache.get("report", options).await.unwrap(),
    Some(Value::Text("expensive".into()))
  );
  cache.flush().await;

  let restarted = CacheBuilder::new()
    .disk_store(disk_options(dir.path(), false))
    .build()
    .unwrap();
  let options = counting_builder(&build_count, "expensive", Duration::ZERO);
  assert_eq!(
    restarted.get("report", options).await.unwrap(),
    Some(Value::Text("expensive".into()))
  );
  assert_eq!(build_count.load(Ordering::SeqCst), 1, "Restart should not rebuild");
}

#[tokio::test]
async fn test_codec_applies_through_cache() {
  let dir = tempdir().unwrap();
  let build = || {
    CacheBuilder::new()
      .disk_store(disk_options(dir.path(), true))
      .codec(Arc::new(JsonCodec))
      .build()
      .unwrap()
  };

  let cache = build();
  cache.put("doc", json!({ "a": [1, 2] })).await;
  cache.flush().await;

  let restarted = build();
  assert_eq!(
    restarted.get("doc", GetOptions::new()).await.unwrap(),
    Some(Value::Json(json!({ "a": [1, 2] })))
  );
  // Codec entries are materialized, never streamed.
  let mut stream = restarted.create_read_stream("doc", GetOptions::new());
  assert!(futures_util::StreamExt::next(&mut stream).await.unwrap().is_err());
}

#[tokio::test]
async fn test_free_reloads_from_disk() {
  let dir = tempdir().unwrap();
  let cache = CacheBuilder::new()
    .disk_store(disk_options(dir.path(), false))
    .build()
    .unwrap();
  cache.put("key", "value").await;
  cache.flush().await;

  cache.free();
  assert_eq!(cache.metrics().frees, 1);
  assert_eq!(
    cache.get("key", GetOptions::new()).await.unwrap(),
    Some(Value::Text("value".into()))
  );
}

#[tokio::test]
async fn test_codec_set_before_store_is_kept() {
  let dir = tempdir().unwrap();
  let build = || {
    CacheBuilder::new()
      .codec(Arc::new(JsonCodec))
      .disk_store(disk_options(dir.path(), false))
      .build()
      .unwrap()
  };

  let cache = build();
  cache.put("doc", json!({ "ok": true })).await;
  cache.flush().await;

  let entry = build()
    .get_entry("doc", GetOptions::new())
    .await
    .unwrap()
    .unwrap();
  assert!(entry.has_deserializer());
  assert_eq!(
    entry.read_value().await.unwrap(),
    Value::Json(json!({ "ok": true }))
  );
}
