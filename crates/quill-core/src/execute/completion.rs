//! One-shot completion flag.
//!
//! The orchestrator owns the [`Completion`] and consumes it when the run ends,
//! so the flag is raised exactly once and never lowered. The snapshot writer
//! holds a [`CompletionWatch`] that can both poll and await it.

use tokio::sync::watch;

/// Create a linked completion flag and watcher.
pub fn completion() -> (Completion, CompletionWatch) {
    let (tx, rx) = watch::channel(false);
    (Completion { tx }, CompletionWatch { rx })
}

/// Raising side of the completion flag.
#[derive(Debug)]
pub struct Completion {
    tx: watch::Sender<bool>,
}

impl Completion {
    /// Mark the run as finished.
    pub fn complete(self) {
        self.tx.send_replace(true);
    }
}

/// Observing side of the completion flag.
#[derive(Debug, Clone)]
pub struct CompletionWatch {
    rx: watch::Receiver<bool>,
}

impl CompletionWatch {
    /// Whether the run has finished.
    ///
    /// A dropped [`Completion`] counts as finished so that a watcher can never
    /// wait forever on a run that went away.
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the run has finished.
    pub async fn wait(&mut self) {
        // Err means the sender is gone, which counts as finished.
        let _ = self.rx.wait_for(|done| *done).await;
    }
}
