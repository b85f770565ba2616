//! Execution engine for Quill notebooks.
//!
//! Cells run strictly in document order on a single kernel session. Each
//! finished cell is written back to the shared [`LiveDocument`] before the
//! next one starts, so a concurrent reader always sees a consistent prefix.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run
//!     │
//!     ├── Progress (iterator of cell indices)
//!     │       └── ProgressSink::on_event (started / finished / summary)
//!     │
//!     ├── KernelExecutor::execute (ProcessKernel or any other backend)
//!     │       └── cell copy updated with outputs + execution_count
//!     │
//!     ├── LiveDocument::store (publish the finished cell)
//!     │
//!     └── Completion::complete (exactly once, on success or failure)
//! ```
//!
//! # Module Structure
//!
//! - `completion` - One-shot completion flag shared with the snapshot writer
//! - `kernel` - The `KernelExecutor` trait
//! - `orchestrator` - Sequential run of a document
//! - `process` - Python child-process kernel
//! - `progress` - Progress events, sinks and the progress iterator
//!
//! [`LiveDocument`]: crate::document::LiveDocument

mod completion;
mod kernel;
mod orchestrator;
mod process;
mod progress;

pub use completion::{Completion, CompletionWatch, completion};
pub use kernel::KernelExecutor;
pub use orchestrator::{Orchestrator, RunState};
pub use process::{DEFAULT_CELL_TIMEOUT, ProcessKernel, ProcessKernelConfig};
pub use progress::{LogSink, Progress, ProgressEvent, ProgressSink, Verbosity};
