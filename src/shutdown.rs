//! Operator cancellation
//!
//! A [`Shutdown`] handle resolves once an interrupt has been requested. It is
//! cheap to clone and remembers the request, so a handle created or polled
//! after Ctrl+C still sees it.

use tokio::sync::watch;
use tracing::{debug, warn};

/// Sending half; triggering is idempotent
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, observed by the orchestrator
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/handle pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A handle that never fires
    pub fn never() -> Self {
        let (trigger, shutdown) = channel();
        // Dropping the sender leaves the last value (false) in place forever.
        drop(trigger);
        shutdown
    }

    /// Install a Ctrl+C listener and return a handle tied to it
    pub fn on_ctrl_c() -> Self {
        let (trigger, shutdown) = channel();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("CTRL-C received, aborting");
                    trigger.trigger();
                }
                Err(e) => {
                    warn!("Failed to listen for ctrl-c: {}", e);
                    // Keep the sender alive so waiters are not woken spuriously.
                    std::future::pending::<()>().await;
                }
            }
        });
        shutdown
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested. Never returns if the trigger is
    /// dropped without firing.
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                debug!("Shutdown requested");
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
