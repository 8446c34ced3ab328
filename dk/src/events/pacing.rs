//! Debounce and throttle state owned by a listener record
//!
//! Each pacer is disposed when its listener is removed so no timer outlives
//! the registration that created it.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delays a call until `delay` has passed without another call
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `work`, replacing any call still waiting out its delay
    ///
    /// Without a tokio runtime the delay cannot be honoured and the work is
    /// dropped with a warning.
    pub fn call<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(delay_ms = self.delay.as_millis() as u64, "Debouncer::call: no runtime, dropping call");
            return;
        };

        let delay = self.delay;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(task) {
            debug!("Debouncer::call: superseding pending call");
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancel the pending call, if any
    pub fn dispose(&self) {
        if let Some(task) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Lets at most one call through per window; the rest are dropped
#[derive(Debug)]
pub struct Throttler {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when the caller may run now; opens a new window if so
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn dispose(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Pacing attached to a listener record
#[derive(Debug, Clone)]
pub enum Pacer {
    Debounce(Arc<Debouncer>),
    Throttle(Arc<Throttler>),
}

impl Pacer {
    pub fn dispose(&self) {
        match self {
            Self::Debounce(d) => d.dispose(),
            Self::Throttle(t) => t.dispose(),
        }
    }
}
