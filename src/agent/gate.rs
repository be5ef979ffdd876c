//! Pause gate for an agent's read loop.

use tokio::sync::watch;

/// A binary open/closed signal. The read loop waits on [`PauseGate::wait_open`]
/// before each read; opening or closing an already open/closed gate is a no-op.
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// A new gate starts open.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn open(&self) {
        self.tx.send_if_modified(|open| !std::mem::replace(open, true));
    }

    pub fn close(&self) {
        self.tx.send_if_modified(|open| std::mem::replace(open, false));
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve immediately if open, otherwise once the gate is opened.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|open| *open).await;
    }
}
