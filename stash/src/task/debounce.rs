use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::BuildError;

/// Runs an action once a quiet period has passed since the last `schedule`.
///
/// Every call to `schedule` cancels the pending timer and starts a new one,
/// so a burst of calls produces a single run after the burst ends. The
/// action itself is spawned as its own task once the timer fires, so a later
/// `schedule` can never interrupt an action that has already started.
pub(crate) struct Debouncer {
  delay: Duration,
  runtime: Handle,
  timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
  /// Creates a debouncer bound to the current Tokio runtime.
  pub(crate) fn new(delay: Duration) -> Result<Self, BuildError> {
    let runtime = Handle::try_current().map_err(|_| BuildError::RuntimeRequired)?;
    Ok(Self {
      delay,
      runtime,
      timer: Mutex::new(None),
    })
  }

  pub(crate) fn delay(&self) -> Duration {
    self.delay
  }

  pub(crate) fn schedule<F, Fut>(&self, action: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let delay = self.delay;
    let runtime = self.runtime.clone();
    let timer = self.runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      runtime.spawn(action());
    });

    if let Some(previous) = self.timer.lock().replace(timer) {
      previous.abort();
    }
  }

  /// Cancels the pending timer, if any.
  pub(crate) fn cancel(&self) {
    if let Some(timer) = self.timer.lock().take() {
      timer.abort();
    }
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    self.cancel();
  }
}
