mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{counting_builder, memory_cache};
use fibre_stash::{BoxError, Built, CacheBuilder, CacheError, GetOptions, Payload, Value};
use tokio::sync::Barrier;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_missing_key_resolves_to_none() {
  let cache = memory_cache();
  let value = cache.get("missing", GetOptions::new()).await.unwrap();
  assert!(value.is_none());
  assert_eq!(cache.metrics().misses, 1);
}

#[tokio::test]
async fn test_put_then_get() {
  let cache = memory_cache();
  cache.put("hello", "world").await;

  let value = cache.get("hello", GetOptions::new()).await.unwrap();
  assert_eq!(value, Some(Value::Text("world".into())));
  assert!(cache.contains("hello", None).await.unwrap());
  assert_eq!(cache.metrics().inserts, 1);
  assert_eq!(cache.metrics().hits, 2);
}

#[tokio::test]
async fn test_put_empty_payload_removes() {
  let cache = memory_cache();
  cache.put("hello", "world").await;
  cache.put("hello", Payload::Empty).await;

  assert!(!cache.contains("hello", None).await.unwrap());
  assert_eq!(cache.metrics().removals, 1);
}

#[tokio::test]
async fn test_builder_runs_once_for_concurrent_callers() {
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = memory_cache();
  let num_tasks = 3;

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut tasks = vec![];

  for _ in 0..num_tasks {
    let cache = cache.clone();
    let barrier = barrier.clone();
    let options = counting_builder(&build_count, "world", Duration::from_millis(100));
    tasks.push(tokio::spawn(async move {
      barrier.wait().await;
      cache.get("hello", options).await.unwrap()
    }));
  }

  for task in tasks {
    assert_eq!(task.await.unwrap(), Some(Value::Text("world".into())));
  }

  assert_eq!(build_count.load(Ordering::SeqCst), 1, "Builder should run exactly once");
  let metrics = cache.metrics();
  assert_eq!(metrics.builds, 1);
  assert!(metrics.hold_waits >= 1, "Other callers should have waited on the build");
  assert_eq!(cache.pending_builds(), 0);

  // A later lookup is a plain hit.
  let options = counting_builder(&build_count, "again", Duration::ZERO);
  let value = cache.get("hello", options).await.unwrap();
  assert_eq!(value, Some(Value::Text("world".into())));
  assert_eq!(build_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_build_failure_reaches_every_waiter() {
  let cache = memory_cache();
  let barrier = Arc::new(Barrier::new(2));

  let failing = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    tokio::spawn(async move {
      let options = GetOptions::new().builder(|| async {
        sleep(Duration::from_millis(100)).await;
        Err::<Value, BoxError>("boom".into())
      });
      barrier.wait().await;
      cache.get("key", options).await
    })
  };

  let waiting = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    tokio::spawn(async move {
      barrier.wait().await;
      // Arrive after the build has started.
      sleep(Duration::from_millis(20)).await;
      let options = GetOptions::new().builder(|| async { Ok::<_, BoxError>("unused") });
      cache.get("key", options).await
    })
  };

  let first = failing.await.unwrap().unwrap_err();
  let second = waiting.await.unwrap().unwrap_err();
  for err in [&first, &second] {
    match err {
      CacheError::BuildFailed { key, source } => {
        assert_eq!(key, "key");
        assert_eq!(source.to_string(), "boom");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  assert!(!cache.contains("key", None).await.unwrap(), "Nothing should be stored");
  assert_eq!(cache.metrics().build_failures, 1);
}

#[tokio::test]
async fn test_rebuild_replaces_fresh_entry() {
  let cache = memory_cache();
  cache.put("key", "old").await;

  let options = GetOptions::new()
    .rebuild(true)
    .builder(|| async { Ok::<_, BoxError>("new") });
  let value = cache.get("key", options).await.unwrap();
  assert_eq!(value, Some(Value::Text("new".into())));

  let value = cache.get("key", GetOptions::new()).await.unwrap();
  assert_eq!(value, Some(Value::Text("new".into())));
}

#[tokio::test]
async fn test_builder_reported_version_is_recorded() {
  let cache = memory_cache();
  let options = GetOptions::new()
    .builder(|| async { Ok::<_, BoxError>(Built::new("v7").last_modified(7)) });
  let entry = cache.get_entry("key", options).await.unwrap().unwrap();
  assert_eq!(entry.meta().last_modified, Some(7));

  // The recorded version satisfies callers that know about version 7.
  assert!(cache.contains("key", Some(7)).await.unwrap());
  assert!(!cache.contains("key", Some(8)).await.unwrap());
}

#[tokio::test]
async fn test_outdated_build_result_is_not_stored() {
  let cache = memory_cache();
  let options = GetOptions::new()
    .last_modified(10)
    .builder(|| async { Ok::<_, BoxError>(Built::new("v3").last_modified(3)) });

  let entry = cache.get_entry("key", options).await.unwrap().unwrap();
  assert_eq!(entry.value(), Some(&Value::Text("v3".into())));
  assert_eq!(entry.meta().last_modified, Some(3));

  let metrics = cache.metrics();
  assert_eq!(metrics.inserts, 0, "An outdated result must not be written");
  assert_eq!(metrics.evicted_by_version, 0);
  assert!(!cache.contains("key", None).await.unwrap());
}

#[tokio::test]
async fn test_builder_empty_payload_yields_none() {
  let cache = memory_cache();
  let options = GetOptions::new().builder(|| async { Ok::<_, BoxError>(Payload::Empty) });
  assert!(cache.get("key", options).await.unwrap().is_none());
  assert!(!cache.contains("key", None).await.unwrap());
}

#[tokio::test]
async fn test_writes_disabled() {
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = CacheBuilder::new().write(false).build().unwrap();

  cache.put("key", "value").await;
  assert!(!cache.contains("key", None).await.unwrap());

  // Built values are still returned to the caller, just never stored.
  for expected_builds in 1..=2 {
    let options = counting_builder(&build_count, "built", Duration::ZERO);
    let value = cache.get("key", options).await.unwrap();
    assert_eq!(value, Some(Value::Text("built".into())));
    assert_eq!(build_count.load(Ordering::SeqCst), expected_builds);
  }
}

#[tokio::test]
async fn test_reads_disabled() {
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = CacheBuilder::new().read(false).build().unwrap();

  cache.put("key", "value").await;
  let options = counting_builder(&build_count, "built", Duration::ZERO);
  assert!(cache.get("key", options).await.unwrap().is_none());
  assert!(!cache.contains("key", None).await.unwrap());
  assert_eq!(build_count.load(Ordering::SeqCst), 0, "Builder must not run");
}

#[tokio::test]
async fn test_remove_during_build_discards_result() {
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = memory_cache();

  let building = {
    let cache = cache.clone();
    let options = counting_builder(&build_count, "world", Duration::from_millis(100));
    tokio::spawn(async move { cache.get("hello", options).await.unwrap() })
  };

  sleep(Duration::from_millis(20)).await;
  assert_eq!(cache.pending_builds(), 1);
  cache.remove("hello").await;
  assert_eq!(cache.pending_builds(), 0);

  // The builder's own caller still gets the value.
  assert_eq!(building.await.unwrap(), Some(Value::Text("world".into())));
  assert!(
    !cache.contains("hello", None).await.unwrap(),
    "A removed key must not be brought back by its build"
  );
}

#[tokio::test]
async fn test_cancelled_build_releases_hold() {
  let build_count = Arc::new(AtomicUsize::new(0));
  let cache = memory_cache();

  let stuck = {
    let cache = cache.clone();
    let options = counting_builder(&build_count, "never", Duration::from_secs(60));
    tokio::spawn(async move { cache.get("key", options).await })
  };

  sleep(Duration::from_millis(20)).await;
  assert_eq!(cache.pending_builds(), 1);
  stuck.abort();
  assert!(stuck.await.unwrap_err().is_cancelled());
  assert_eq!(cache.pending_builds(), 0);

  let options = counting_builder(&build_count, "fresh", Duration::ZERO);
  let value = cache.get("key", options).await.unwrap();
  assert_eq!(value, Some(Value::Text("fresh".into())));
  assert_eq!(build_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_free_delay_frees_after_inactivity() {
  let cache = CacheBuilder::new()
    .free_delay(Duration::from_millis(50))
    .build()
    .unwrap();

  for _ in 0..3 {
    cache.put("key", "value").await;
    sleep(Duration::from_millis(20)).await;
  }
  assert_eq!(cache.metrics().frees, 0, "Activity should keep postponing the free");

  sleep(Duration::from_millis(150)).await;
  assert_eq!(cache.metrics().frees, 1);
  // The memory store cannot reload what it freed.
  assert!(!cache.contains("key", None).await.unwrap());
}

#[test]
fn test_free_delay_requires_runtime() {
  let err = CacheBuilder::new()
    .free_delay(Duration::from_millis(50))
    .build()
    .unwrap_err();
  assert_eq!(err, fibre_stash::BuildError::RuntimeRequired);
}
