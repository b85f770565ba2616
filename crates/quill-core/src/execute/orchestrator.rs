//! Sequential execution of a document.

use crate::document::LiveDocument;
use crate::error::{Error, Result};

use super::completion::Completion;
use super::kernel::KernelExecutor;
use super::progress::{Progress, ProgressSink, Verbosity};

/// Lifecycle of an orchestrator. `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Runs every cell of a document, in order, through one kernel session.
pub struct Orchestrator<'a> {
    kernel: &'a mut dyn KernelExecutor,
    sink: &'a dyn ProgressSink,
    verbosity: Verbosity,
    state: RunState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        kernel: &'a mut dyn KernelExecutor,
        sink: &'a dyn ProgressSink,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            kernel,
            sink,
            verbosity,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the document and raise `done` when finished, whatever the outcome.
    ///
    /// Stops at the first failing cell; later cells are never sent to the
    /// kernel. Each cell is executed on a copy and published with a single
    /// [`LiveDocument::store`], so readers never see a partially updated cell.
    pub async fn run(&mut self, document: &LiveDocument, done: Completion) -> Result<()> {
        if self.state != RunState::Idle {
            done.complete();
            return Err(Error::InvalidOperation(format!(
                "orchestrator already {:?}",
                self.state
            )));
        }
        self.state = RunState::Running;

        let result = self.execute_all(document).await;
        let shutdown = self.kernel.shutdown().await;
        let result = result.and(shutdown);

        self.state = match result {
            Ok(()) => RunState::Completed,
            Err(_) => RunState::Failed,
        };
        done.complete();

        if let Err(err) = &result {
            tracing::debug!("Run failed: {}", err);
        }
        result
    }

    async fn execute_all(&mut self, document: &LiveDocument) -> Result<()> {
        self.kernel.start().await?;

        let mut progress = Progress::new(document, self.sink, self.verbosity);
        while let Some(index) = progress.next() {
            let Some(mut cell) = document.cell(index) else {
                break;
            };
            let result = self.kernel.execute(&mut cell, index).await;
            document.store(index, cell);
            if let Err(err) = result {
                progress.abort();
                return Err(err);
            }
        }
        Ok(())
    }
}
