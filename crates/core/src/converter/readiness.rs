//! Backend readiness tracking with a one-shot readiness deadline.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

use super::types::BackendStatus;

struct ReadinessInner {
    backend: String,
    tx: watch::Sender<BackendStatus>,
    deadline: Mutex<Option<Instant>>,
    timeout: Duration,
}

impl ReadinessInner {
    fn expire_if_due(&self) {
        let expired = match self.deadline.lock() {
            Ok(mut deadline) => match *deadline {
                Some(at) if Instant::now() >= at => {
                    *deadline = None;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if !expired {
            return;
        }

        let reverted = self.tx.send_if_modified(|status| {
            if matches!(*status, BackendStatus::Ready | BackendStatus::Error) {
                false
            } else {
                *status = BackendStatus::NotReady;
                true
            }
        });
        if reverted {
            warn!(
                backend = %self.backend,
                "Backend not ready after {} seconds",
                self.timeout.as_secs()
            );
        }
    }

    fn disarm(&self) {
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = None;
        }
    }
}

/// Observable readiness of a backend.
///
/// Starts `NotReady` with a deadline armed. Reaching `Ready` or `Error`
/// disarms it; any other state still current when the deadline passes
/// reverts to `NotReady`. `Error` is terminal for the instance.
#[derive(Clone)]
pub struct Readiness {
    inner: Arc<ReadinessInner>,
}

impl Readiness {
    pub fn new(backend: impl Into<String>, timeout: Duration) -> Self {
        let (tx, _) = watch::channel(BackendStatus::NotReady);
        let inner = Arc::new(ReadinessInner {
            backend: backend.into(),
            tx,
            deadline: Mutex::new(Some(Instant::now() + timeout)),
            timeout,
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let weak: Weak<ReadinessInner> = Arc::downgrade(&inner);
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire_if_due();
                }
            });
        }

        Self { inner }
    }

    /// Readiness that starts `Ready` with no deadline.
    pub fn ready(backend: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(BackendStatus::Ready);
        Self {
            inner: Arc::new(ReadinessInner {
                backend: backend.into(),
                tx,
                deadline: Mutex::new(None),
                timeout: Duration::ZERO,
            }),
        }
    }

    /// Current status, applying the deadline if it has passed.
    pub fn status(&self) -> BackendStatus {
        self.inner.expire_if_due();
        *self.inner.tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == BackendStatus::Ready
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<BackendStatus> {
        self.inner.tx.subscribe()
    }

    /// Marks engine assets as being fetched. Ignored once terminal.
    pub fn mark_downloading(&self) {
        self.inner.tx.send_if_modified(|status| {
            if matches!(*status, BackendStatus::NotReady) {
                *status = BackendStatus::Downloading;
                true
            } else {
                false
            }
        });
    }

    pub fn mark_ready(&self) {
        self.inner.disarm();
        self.inner.tx.send_if_modified(|status| {
            if matches!(*status, BackendStatus::Error | BackendStatus::Ready) {
                false
            } else {
                *status = BackendStatus::Ready;
                true
            }
        });
    }

    pub fn mark_error(&self) {
        self.inner.disarm();
        self.inner.tx.send_replace(BackendStatus::Error);
    }
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readiness")
            .field("backend", &self.inner.backend)
            .field("status", &*self.inner.tx.borrow())
            .finish()
    }
}
