//! Core engine for Quill, a headless runner for parameterized notebooks.
//!
//! This crate provides:
//! - Notebook document model (nbformat v4)
//! - Parameter injection via a real Python parser
//! - Sequential cell execution with progress reporting
//! - Periodic and final report snapshots while a job runs
//! - Local and `s3://` storage

pub mod document;
pub mod error;
pub mod execute;
pub mod inject;
pub mod job;
pub mod render;
pub mod snapshot;
pub mod storage;

pub use document::{Cell, CodeCell, Document, LiveDocument, Output};
pub use error::{Error, ExecutionError, PersistError, Result};
pub use execute::{
    Completion, CompletionWatch, KernelExecutor, LogSink, Orchestrator, ProcessKernel,
    ProcessKernelConfig, Progress, ProgressEvent, ProgressSink, RunState, Verbosity, completion,
};
pub use inject::{CellLanguage, Parameter, ParameterInjector, ParseSkip, Python};
pub use job::{Job, JobConfig, JobReport};
pub use render::{HtmlRenderer, Renderer};
pub use snapshot::{DEFAULT_SNAPSHOT_INTERVAL, SnapshotStats, SnapshotWriter};
pub use storage::{
    HttpObjectStore, Location, MemoryObjectStore, ObjectStore, REMOTE_MARKER, Storage,
};
