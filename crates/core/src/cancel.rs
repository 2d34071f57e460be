//! Cooperative cancellation.
//!
//! A wall-clock timeout fires the [`CancelHandle`]; functions and scripts
//! observe it through their [`CancelSignal`]. Nothing is preempted: an
//! in-flight await keeps running until the callee checks the signal.

use tokio::sync::watch;

/// The firing side, held by whoever owns the deadline.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Notify every signal cloned from this handle.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The observing side, handed to functions through their context.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create a linked handle/signal pair.
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation has been requested.
    ///
    /// If the handle is dropped without firing, this never resolves.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
