//! One notebook run from loaded document to final report.
//!
//! ```text
//! Document ── clean ── inject ──┬── Orchestrator::run ──── Completion ──┐
//!                               │                                       ▼
//!                               └── SnapshotWriter::run ◄── CompletionWatch
//!                                           │
//!                                   final flush (always)
//! ```

use std::time::Duration;

use crate::document::{Document, LiveDocument};
use crate::error::{Error, Result};
use crate::execute::{KernelExecutor, Orchestrator, ProgressSink, RunState, Verbosity, completion};
use crate::inject::{CellLanguage, Parameter, ParameterInjector};
use crate::render::Renderer;
use crate::snapshot::{DEFAULT_SNAPSHOT_INTERVAL, SnapshotStats, SnapshotWriter};
use crate::storage::Storage;

/// Settings for a single job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Where the rendered report goes.
    pub output: String,
    /// Write the executed notebook back to this location as well.
    pub in_place: Option<String>,
    pub snapshot_interval: Duration,
    pub verbosity: Verbosity,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output: "output.html".to_string(),
            in_place: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            verbosity: Verbosity::Normal,
        }
    }
}

/// Outcome of a job that ran to the end.
#[derive(Debug)]
pub struct JobReport {
    pub state: RunState,
    pub snapshots: SnapshotStats,
    /// The document as executed.
    pub document: Document,
}

/// A single parameterized run.
pub struct Job<'a> {
    storage: &'a Storage,
    renderer: &'a dyn Renderer,
    kernel: &'a mut dyn KernelExecutor,
    sink: &'a dyn ProgressSink,
    config: JobConfig,
}

impl<'a> Job<'a> {
    pub fn new(
        storage: &'a Storage,
        renderer: &'a dyn Renderer,
        kernel: &'a mut dyn KernelExecutor,
        sink: &'a dyn ProgressSink,
        config: JobConfig,
    ) -> Self {
        Self {
            storage,
            renderer,
            kernel,
            sink,
            config,
        }
    }

    /// Clean `document`, inject `parameters`, then execute it while snapshotting.
    ///
    /// If injection fails nothing is executed, but the report of the cleaned
    /// document is still written. On any failure the final flush is attempted
    /// first; if it fails too, both errors are returned as
    /// [`Error::FinalFlush`].
    pub async fn run<L: CellLanguage>(
        self,
        mut document: Document,
        parameters: &[Parameter],
        injector: &ParameterInjector<L>,
    ) -> Result<JobReport> {
        document.clean();
        let injected = injector.set_parameters(&mut document, parameters);

        let mut writer = SnapshotWriter::new(self.storage, self.renderer, self.config.output.as_str())
            .with_interval(self.config.snapshot_interval);
        if let Some(location) = &self.config.in_place {
            writer = writer.with_notebook_copy(location.as_str());
        }

        let live = LiveDocument::new(document);

        if let Err(err) = injected {
            let flushed = writer.flush(&live).await;
            return Err(combine(err, flushed));
        }

        let (done, watch) = completion();
        let mut orchestrator = Orchestrator::new(self.kernel, self.sink, self.config.verbosity);
        let (executed, snapshots) = tokio::join!(
            orchestrator.run(&live, done),
            writer.run(&live, watch)
        );

        match (executed, snapshots) {
            (Ok(()), Ok(snapshots)) => Ok(JobReport {
                state: orchestrator.state(),
                snapshots,
                document: live.into_inner(),
            }),
            (Ok(()), Err(flush)) => Err(flush),
            (Err(err), snapshots) => Err(combine(err, snapshots.map(|_| ()))),
        }
    }
}

/// Attach a failed final flush to the error that ended the job.
fn combine(cause: Error, flushed: Result<()>) -> Error {
    match flushed {
        Ok(()) => cause,
        Err(flush) => Error::FinalFlush {
            cause: Box::new(cause),
            flush: Box::new(flush),
        },
    }
}
