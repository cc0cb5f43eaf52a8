//! Listener handle: the write side of one subscriber's event queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use authrelay_core::ListenerId;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One serialized event, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Why a single write to a handle failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The listener's queue is at capacity.
    #[error("listener queue full")]
    Full,
    /// The listener's transport is gone or the handle was closed.
    #[error("listener closed")]
    Closed,
}

struct State {
    tx: Option<mpsc::Sender<Frame>>,
    /// `false` until the bootstrap frame has been written.
    primed: bool,
    /// Broadcasts received before priming.
    pending: VecDeque<Frame>,
}

/// An open, writable output channel for exactly one subscriber.
///
/// A handle created with [`ListenerHandle::gated`] holds back pushes until
/// [`prime`](Self::prime) writes the bootstrap frame, then flushes them in
/// arrival order. Its channel carries one extra slot so the bootstrap frame
/// never displaces a held-back push. Writes never block: a full queue drops
/// the frame.
pub struct ListenerHandle {
    id: ListenerId,
    state: Mutex<State>,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ListenerHandle {
    /// Create an open handle and its receiving end.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        Self::build(capacity, true)
    }

    /// Create a handle that buffers pushes until primed.
    pub fn gated(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        Self::build(capacity, false)
    }

    fn build(capacity: usize, primed: bool) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let capacity = capacity.max(1);
        let bootstrap_slot = usize::from(!primed);
        let (tx, rx) = mpsc::channel(capacity + bootstrap_slot);
        let handle = Self {
            id: ListenerId::new(),
            state: Mutex::new(State {
                tx: Some(tx),
                primed,
                pending: VecDeque::new(),
            }),
            capacity,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (Arc::new(handle), rx)
    }

    /// Listener identity.
    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    /// Write a frame, or hold it back if the handle is not yet primed.
    pub fn push(&self, frame: Frame) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        let result = if state.primed {
            self.write(&state, frame)
        } else if state.tx.as_ref().is_none_or(mpsc::Sender::is_closed) {
            Err(DeliveryError::Closed)
        } else if state.pending.len() >= self.capacity {
            Err(DeliveryError::Full)
        } else {
            state.pending.push_back(frame);
            Ok(())
        };
        if result.is_err() {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Write the bootstrap frame, then flush held-back pushes behind it.
    ///
    /// Returns the outcome of the bootstrap write. Later calls behave like
    /// [`push`](Self::push).
    pub fn prime(&self, bootstrap: Frame) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        if state.primed {
            drop(state);
            return self.push(bootstrap);
        }
        state.primed = true;
        let result = self.write(&state, bootstrap);
        let pending = std::mem::take(&mut state.pending);
        for frame in pending {
            if self.write(&state, frame).is_err() {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        if result.is_err() {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn write(&self, state: &State, frame: Frame) -> Result<(), DeliveryError> {
        let Some(tx) = state.tx.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        match tx.try_send(frame) {
            Ok(()) => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Stop accepting writes. The receiver drains what is queued, then ends.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.tx = None;
        state.pending.clear();
    }

    /// Whether the handle was closed or its receiver dropped.
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .tx
            .as_ref()
            .is_none_or(mpsc::Sender::is_closed)
    }

    /// Whether the bootstrap frame has been written.
    #[cfg(test)]
    pub(crate) fn is_primed(&self) -> bool {
        self.state.lock().primed
    }

    /// Frames written to the queue.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("delivered", &self.delivered_count())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
