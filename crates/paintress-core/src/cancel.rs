//! Process-wide cooperative cancellation.
//!
//! A [`CancelHandle`] fires once; every [`CancelSignal`] cloned from it
//! observes the same reason. Blocking calls race their work against
//! [`CancelSignal::cancelled`] instead of polling a global flag.

use tokio::sync::watch;

/// Sending half. Firing is idempotent: the first reason wins.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<Option<String>>>,
}

/// Receiving half threaded through every blocking call.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<String>>,
}

/// Create a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (
        CancelHandle {
            tx: std::sync::Arc::new(tx),
        },
        CancelSignal { rx },
    )
}

impl CancelHandle {
    /// Fire the signal with `reason` (e.g. `"SIGINT"`).
    ///
    /// Returns `false` if it had already fired.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_handle, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The reason passed to [`CancelHandle::cancel`], if fired.
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolve once the signal fires, yielding its reason.
    ///
    /// If every handle is dropped without firing, pends forever.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
