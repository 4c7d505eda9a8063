//! Level-triggered cancellation scope shared by every pipeline thread.
//!
//! The token pairs an atomic flag (cheap polling between records) with a
//! zero-capacity channel whose only sender is dropped on cancellation. A
//! disconnected receiver is always ready, so `recv(token.receiver())` can sit
//! in any `select!` next to a blocking send or receive and fire the moment
//! the scope is cancelled.

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::PipelineError;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Cloneable handle to one cancellation scope. Once cancelled it stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Cancel the scope. Returns `true` only for the call that actually
    /// performed the transition; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trigger.take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes permanently ready once the scope is cancelled.
    /// Never yields a message; only the disconnect matters.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// `Err(Cancelled)` once the scope has been cancelled.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Block until cancelled or `timeout` elapses. Returns whether the scope
    /// is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }

    /// Block until the scope is cancelled.
    pub fn wait(&self) {
        let _ = self.inner.signal.recv();
    }
}

/// Hand `item` to `tx`, giving up if `cancel` fires first or the receiving
/// side is gone. Returns whether the item was delivered.
pub fn send_or_cancel<T>(tx: &Sender<T>, item: T, cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    select! {
        send(tx, item) -> res => res.is_ok(),
        recv(cancel.receiver()) -> _ => false,
    }
}
