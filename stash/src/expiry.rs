use std::time::Duration;

use crate::entry::EntryMeta;
use crate::time;

/// Why an entry was found stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Staleness {
  /// Not accessed within the time-to-idle.
  Idle,
  /// Older than the time-to-live.
  Expired,
  /// The caller knows of a newer version.
  Outdated,
}

/// The time-based freshness rules of one cache. A `None` duration disables
/// that rule.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExpiryPolicy {
  pub(crate) time_to_live: Option<Duration>,
  pub(crate) time_to_idle: Option<Duration>,
}

impl ExpiryPolicy {
  pub(crate) fn tracks_access(&self) -> bool {
    self.time_to_idle.is_some()
  }

  /// Checks idle time, then age, then version. A rule whose timestamp is
  /// missing from `meta` does not apply.
  pub(crate) fn check(
    &self,
    meta: &EntryMeta,
    last_modified: Option<u64>,
    now: u64,
  ) -> Option<Staleness> {
    if let (Some(tti), Some(accessed)) = (self.time_to_idle, meta.last_accessed) {
      if now.saturating_sub(accessed) > time::duration_millis(tti) {
        return Some(Staleness::Idle);
      }
    }

    if let (Some(ttl), Some(created)) = (self.time_to_live, meta.created) {
      if now.saturating_sub(created) > time::duration_millis(ttl) {
        return Some(Staleness::Expired);
      }
    }

    if let Some(wanted) = last_modified {
      match meta.last_modified {
        Some(stored) if stored >= wanted => {}
        _ => return Some(Staleness::Outdated),
      }
    }

    None
  }

  /// The metadata of an entry written at `now`.
  pub(crate) fn stamp(&self, last_modified: Option<u64>, now: u64) -> EntryMeta {
    EntryMeta {
      created: self.time_to_live.map(|_| now),
      last_accessed: self.time_to_idle.map(|_| now),
      last_modified,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NOW: u64 = 1_000_000;

  fn policy(ttl: Option<u64>, tti: Option<u64>) -> ExpiryPolicy {
    ExpiryPolicy {
      time_to_live: ttl.map(Duration::from_millis),
      time_to_idle: tti.map(Duration::from_millis),
    }
  }

  #[test]
  fn disabled_rules_never_expire() {
    let meta = EntryMeta {
      created: Some(0),
      last_accessed: Some(0),
      last_modified: None,
    };
    assert_eq!(policy(None, None).check(&meta, None, NOW), None);
  }

  #[test]
  fn idle_is_checked_before_age() {
    let meta = policy(Some(10), Some(10)).stamp(None, NOW - 100);
    assert_eq!(
      policy(Some(10), Some(10)).check(&meta, None, NOW),
      Some(Staleness::Idle)
    );
  }

  #[test]
  fn age_boundary_is_inclusive() {
    let meta = policy(Some(50), None).stamp(None, NOW - 50);
    assert_eq!(policy(Some(50), None).check(&meta, None, NOW), None);
    assert_eq!(
      policy(Some(50), None).check(&meta, None, NOW + 1),
      Some(Staleness::Expired)
    );
  }

  #[test]
  fn version_ties_are_fresh() {
    let p = policy(None, None);
    let meta = p.stamp(Some(5), NOW);
    assert_eq!(p.check(&meta, Some(5), NOW), None);
    assert_eq!(p.check(&meta, Some(4), NOW), None);
    assert_eq!(p.check(&meta, Some(10), NOW), Some(Staleness::Outdated));
  }

  #[test]
  fn unversioned_entry_is_outdated_when_caller_has_a_version() {
    let p = policy(None, None);
    let meta = p.stamp(None, NOW);
    assert_eq!(p.check(&meta, Some(1), NOW), Some(Staleness::Outdated));
    assert_eq!(p.check(&meta, None, NOW), None);
  }
}
