//! Counting semaphore built on a bounded channel: each held permit is one
//! message sitting in the channel buffer.

use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TrySendError};
use std::time::Instant;

use super::cancel::CancelToken;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct Semaphore {
    slots_tx: Sender<()>,
    slots_rx: Receiver<()>,
    limit: usize,
}

impl Semaphore {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (slots_tx, slots_rx) = bounded(limit);
        Self {
            slots_tx,
            slots_rx,
            limit,
        }
    }

    /// Block until a permit is available.
    pub fn acquire(&self) {
        // Both ends live in self, so the channel never disconnects.
        let _ = self.slots_tx.send(());
    }

    pub fn try_acquire(&self) -> bool {
        match self.slots_tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Block until a permit is available or `deadline` passes.
    pub fn acquire_with_deadline(&self, deadline: Instant) -> Result<(), PipelineError> {
        match self.slots_tx.send_deadline((), deadline) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(PipelineError::Timeout),
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::Cancelled),
        }
    }

    /// Block until a permit is available or `cancel` fires.
    pub fn acquire_cancellable(&self, cancel: &CancelToken) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        select! {
            send(self.slots_tx, ()) -> res => res.map_err(|_| PipelineError::Cancelled),
            recv(cancel.receiver()) -> _ => Err(PipelineError::Cancelled),
        }
    }

    /// Return a permit.
    ///
    /// # Panics
    ///
    /// Panics when called without a matching acquire. An unmatched release is
    /// a bug in the caller, not a recoverable condition.
    pub fn release(&self) {
        if self.slots_rx.try_recv().is_err() {
            panic!("semaphore: release without acquire");
        }
    }

    pub fn available(&self) -> usize {
        self.limit - self.slots_tx.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
