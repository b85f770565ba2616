//! Kernel abstraction.

use async_trait::async_trait;

use crate::document::Cell;
use crate::error::Result;

/// A language kernel that executes cells against one persistent session.
///
/// State defined by a cell is visible to every later cell until `shutdown`.
#[async_trait]
pub trait KernelExecutor: Send {
    /// Prepare the session. Called once before the first cell.
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Execute a cell in place.
    ///
    /// On return the cell's outputs and execution counter reflect the run,
    /// including when the cell raised: the error output is recorded in the
    /// cell and an [`Error::Execution`](crate::Error::Execution) is returned.
    /// Non-code cells are left unchanged.
    async fn execute(&mut self, cell: &mut Cell, index: usize) -> Result<()>;

    /// Tear the session down. Called once, after the last cell or a failure.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
