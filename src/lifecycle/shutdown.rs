//! Shutdown coordination for the mediator.
//!
//! The trigger is latched: a task that subscribes after shutdown began still
//! observes it, so connections accepted during the race are drained too.

use tokio::sync::watch;

/// Process-wide stop switch shared by the accept loop and connection tasks.
///
/// Clones share the same switch.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver that resolves once shutdown was triggered.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Begin shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        let newly = self.tx.send_if_modified(|stopping| !std::mem::replace(stopping, true));
        if newly {
            tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Tasks currently holding a signal.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the stop switch.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered; returns at once if it already was.
    pub async fn recv(&mut self) {
        // The sender lives as long as any `Shutdown` clone; if all are gone
        // nobody can trigger, so wait forever.
        if self.rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
