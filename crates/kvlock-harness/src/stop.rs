//! Stop signal for client loops.

use tokio::sync::watch;

/// Creates a connected stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Raises the stop signal for every clone of its [`StopSignal`].
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Tells clients to stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Returns a new signal observing this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observed by clients between operations.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Returns true once the handle has stopped.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the handle stops or is dropped.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
