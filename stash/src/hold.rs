use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use ahash::HashMap;
use parking_lot::Mutex;

use crate::error::CacheError;

/// How a hold ended.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
  /// The build finished or was abandoned. Waiters must look the key up again.
  Settled,
  /// The build failed. Waiters receive the same error.
  Failed(CacheError),
}

enum State {
  Building,
  Released(Outcome),
}

struct Inner {
  state: State,
  /// One slot per registered `Released`, in registration order. A slot is
  /// emptied when its future is dropped.
  waiters: Vec<Option<Waker>>,
}

/// Marks that a build for one key is in progress.
///
/// It can be awaited by any number of tasks; all of them are woken, in the
/// order they registered, when the hold is released.
pub(crate) struct Hold {
  inner: Mutex<Inner>,
  detached: AtomicBool,
}

impl Hold {
  fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Building,
        waiters: Vec::new(),
      }),
      detached: AtomicBool::new(false),
    }
  }

  /// Completes the hold, waking all waiters. Only the first call has any
  /// effect; returns whether this call released it.
  fn release(&self, outcome: Outcome) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Released(_) = inner.state {
        return false;
      }
      inner.state = State::Released(outcome);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters.into_iter().flatten() {
      waker.wake();
    }
    true
  }

  /// `true` if the key was removed while the build was running. The build
  /// result must not be stored.
  pub(crate) fn is_detached(&self) -> bool {
    self.detached.load(Ordering::Acquire)
  }

  /// A future that resolves once the hold is released.
  pub(crate) fn released(self: &Arc<Self>) -> Released {
    Released {
      hold: self.clone(),
      slot: None,
    }
  }
}

pub(crate) struct Released {
  hold: Arc<Hold>,
  slot: Option<usize>,
}

impl Future for Released {
  type Output = Outcome;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let mut inner = this.hold.inner.lock();
    if let State::Released(outcome) = &inner.state {
      return Poll::Ready(outcome.clone());
    }

    // Re-polls refresh the waker in place.
    match this.slot {
      Some(slot) => match &mut inner.waiters[slot] {
        Some(waker) if waker.will_wake(cx.waker()) => {}
        waiter => *waiter = Some(cx.waker().clone()),
      },
      None => {
        this.slot = Some(inner.waiters.len());
        inner.waiters.push(Some(cx.waker().clone()));
      }
    }
    Poll::Pending
  }
}

impl Drop for Released {
  fn drop(&mut self) {
    if let Some(slot) = self.slot {
      // Released holds have already handed their wakers out.
      if let Some(waiter) = self.hold.inner.lock().waiters.get_mut(slot) {
        *waiter = None;
      }
    }
  }
}

/// The result of trying to claim a key for building.
pub(crate) enum Claim<'a> {
  /// The caller owns the build and must release the guard when done.
  Acquired(HoldGuard<'a>),
  /// Another build is in progress.
  Busy(Arc<Hold>),
}

/// The per-cache map of keys with a build in progress.
#[derive(Default)]
pub(crate) struct HoldRegistry {
  pending: Mutex<HashMap<String, Arc<Hold>>>,
}

impl HoldRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Returns the hold for `key`, if a build is in progress.
  pub(crate) fn current(&self, key: &str) -> Option<Arc<Hold>> {
    self.pending.lock().get(key).cloned()
  }

  /// Atomically checks for an existing hold and creates one if there is none.
  pub(crate) fn try_hold(&self, key: &str) -> Claim<'_> {
    let mut pending = self.pending.lock();
    if let Some(existing) = pending.get(key) {
      return Claim::Busy(existing.clone());
    }
    let hold = Arc::new(Hold::new());
    pending.insert(key.to_owned(), hold.clone());
    Claim::Acquired(HoldGuard {
      registry: self,
      key: key.to_owned(),
      hold,
    })
  }

  /// Removes the hold for `key` from the registry without releasing it.
  ///
  /// Waiters already registered keep waiting for the build, but new lookups
  /// no longer see it and its result is discarded.
  pub(crate) fn detach(&self, key: &str) {
    if let Some(hold) = self.pending.lock().remove(key) {
      hold.detached.store(true, Ordering::Release);
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.pending.lock().len()
  }

  fn clear_slot(&self, key: &str, hold: &Arc<Hold>) {
    let mut pending = self.pending.lock();
    if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, hold)) {
      pending.remove(key);
    }
  }
}

/// Ownership of a build for one key. Dropping the guard without calling
/// `release` settles the hold so waiters never hang on an abandoned build.
pub(crate) struct HoldGuard<'a> {
  registry: &'a HoldRegistry,
  key: String,
  hold: Arc<Hold>,
}

impl HoldGuard<'_> {
  pub(crate) fn is_detached(&self) -> bool {
    self.hold.is_detached()
  }

  pub(crate) fn release(self, outcome: Outcome) {
    self.registry.clear_slot(&self.key, &self.hold);
    self.hold.release(outcome);
    // `Drop` runs next and finds the hold already released.
  }
}

impl Drop for HoldGuard<'_> {
  fn drop(&mut self) {
    self.registry.clear_slot(&self.key, &self.hold);
    self.hold.release(Outcome::Settled);
  }
}
