use fibre_stash::{manager, CacheConfigRaw, CacheManager, GetOptions, Value};
use tempfile::tempdir;

fn disk_config() -> CacheConfigRaw {
  CacheConfigRaw {
    store: Some("disk".into()),
    flush_delay: -1,
    ..CacheConfigRaw::default()
  }
}

#[tokio::test]
async fn test_get_or_create_returns_registered_cache() {
  let manager = CacheManager::new("unused");
  let first = manager.get_or_create("pages", CacheConfigRaw::default()).unwrap();
  first.put("home", "hello").await;

  // The second config is ignored for an existing name.
  let config = CacheConfigRaw {
    read: false,
    ..CacheConfigRaw::default()
  };
  let second = manager.get_or_create("pages", config).unwrap();
  assert_eq!(
    second.get("home", GetOptions::new()).await.unwrap(),
    Some(Value::Text("hello".into()))
  );
  assert_eq!(second.name(), "pages");
  assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn test_disk_caches_default_under_base_dir() {
  let base = tempdir().unwrap();
  let manager = CacheManager::new(base.path());
  let cache = manager.get_or_create("user/profile", disk_config()).unwrap();
  cache.put("me", "data").await;
  manager.flush_all().await;

  let cache_dir = base.path().join("user-profile");
  assert!(cache_dir.is_dir(), "expected {}", cache_dir.display());
}

#[tokio::test]
async fn test_flush_all_persists_every_cache() {
  let base = tempdir().unwrap();
  let manager = CacheManager::new(base.path());
  for name in ["a", "b"] {
    let cache = manager.get_or_create(name, disk_config()).unwrap();
    cache.put("key", name).await;
  }
  manager.flush_all().await;

  let mut names = Vec::new();
  manager.for_each(|name, _| names.push(name.to_owned()));
  names.sort();
  assert_eq!(names, vec!["a", "b"]);

  let reopened = CacheManager::new(base.path());
  for name in ["a", "b"] {
    let cache = reopened.get_or_create(name, disk_config()).unwrap();
    assert_eq!(
      cache.get("key", GetOptions::new()).await.unwrap(),
      Some(Value::Text(name.into()))
    );
  }
}

#[tokio::test]
async fn test_invalid_config_is_not_registered() {
  let manager = CacheManager::default();
  let config = CacheConfigRaw {
    store: Some("redis".into()),
    ..CacheConfigRaw::default()
  };
  assert!(manager.get_or_create("broken", config).is_err());
  assert!(manager.get("broken").is_none());
  assert!(manager.is_empty());
}

// The process-wide manager is shared state, so everything touching it lives
// in this one test.
#[tokio::test]
async fn test_global_manager_init_and_reset() {
  let base = tempdir().unwrap();
  let installed = manager::init(base.path());
  assert_eq!(manager::global().base_dir(), base.path());

  let cache = installed.get_or_create("global", CacheConfigRaw::default()).unwrap();
  cache.put("key", "value").await;
  assert!(manager::global().get("global").is_some());

  manager::reset();
  assert!(manager::global().get("global").is_none());
  assert_eq!(manager::global().base_dir(), std::path::Path::new(".cache"));
  // Handles taken before the reset keep working.
  assert!(cache.contains("key", None).await.unwrap());
}
