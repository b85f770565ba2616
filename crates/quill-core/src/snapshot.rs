//! Periodic persistence of an in-flight document.
//!
//! The [`SnapshotWriter`] runs alongside the orchestrator. Until completion
//! is observed it renders and persists the document every interval; a failed
//! periodic flush is logged and the loop carries on. Once the run is over it
//! performs one last flush whose failure is returned to the caller.

use std::time::Duration;

use crate::document::LiveDocument;
use crate::error::Result;
use crate::execute::CompletionWatch;
use crate::render::Renderer;
use crate::storage::Storage;

/// Time between two periodic flushes.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

/// Counters reported by [`SnapshotWriter::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Periodic flushes attempted before completion.
    pub periodic: usize,
    /// Periodic flushes that failed.
    pub failed: usize,
}

/// Renders and persists a live document on a timer.
pub struct SnapshotWriter<'a> {
    storage: &'a Storage,
    renderer: &'a dyn Renderer,
    destination: String,
    notebook_copy: Option<String>,
    interval: Duration,
}

impl<'a> SnapshotWriter<'a> {
    pub fn new(storage: &'a Storage, renderer: &'a dyn Renderer, destination: impl Into<String>) -> Self {
        Self {
            storage,
            renderer,
            destination: destination.into(),
            notebook_copy: None,
            interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Also write the notebook itself to `location` on every flush.
    pub fn with_notebook_copy(mut self, location: impl Into<String>) -> Self {
        self.notebook_copy = Some(location.into());
        self
    }

    /// Flush until `done` fires, then flush once more.
    pub async fn run(&self, document: &LiveDocument, mut done: CompletionWatch) -> Result<SnapshotStats> {
        let mut stats = SnapshotStats::default();

        while !done.is_complete() {
            stats.periodic += 1;
            if let Err(err) = self.flush(document).await {
                stats.failed += 1;
                tracing::warn!("Snapshot failed, will retry: {}", err);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = done.wait() => {}
            }
        }

        self.flush(document).await?;
        tracing::debug!(
            "Final snapshot written to {} after {} periodic flushes ({} failed)",
            self.destination,
            stats.periodic,
            stats.failed
        );
        Ok(stats)
    }

    /// Render the current state and write every target once.
    pub async fn flush(&self, document: &LiveDocument) -> Result<()> {
        let (report, notebook) = document.read(|doc| -> Result<_> {
            let report = self.renderer.render(doc)?;
            let notebook = match self.notebook_copy {
                Some(_) => Some(doc.to_bytes()?),
                None => None,
            };
            Ok((report, notebook))
        })?;

        self.storage
            .persist(&self.destination, report.into_bytes())
            .await?;
        if let (Some(location), Some(bytes)) = (&self.notebook_copy, notebook) {
            self.storage.persist(location, bytes).await?;
        }
        Ok(())
    }
}
