//! Run command implementation for Quill CLI.
//!
//! Loads a notebook, injects parameters and executes it on a Python kernel
//! while the HTML report is refreshed in the background.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quill_core::{
    HtmlRenderer, HttpObjectStore, Job, JobConfig, LogSink, Parameter, ParameterInjector,
    ProcessKernel, ProcessKernelConfig, Renderer, Storage, Verbosity,
};

use crate::ticker::Ticker;

/// Options of `quill run`.
pub struct RunArgs {
    pub notebook: String,
    pub parameters: Vec<Parameter>,
    /// Report destination; defaults to `output.<ext>` in the working directory.
    pub output: Option<String>,
    pub in_place: bool,
    pub snapshot_interval: Duration,
    pub cell_timeout: Option<Duration>,
    pub python: Option<PathBuf>,
    pub s3_endpoint: String,
    pub verbosity: Verbosity,
}

/// Execute a notebook.
pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let storage = Storage::new(Arc::new(HttpObjectStore::new(args.s3_endpoint.as_str())));
    let document = storage.load_document(&args.notebook).await?;
    let injector = ParameterInjector::python()?;
    let renderer = HtmlRenderer::new(title(&args.notebook));

    let mut kernel_config = ProcessKernelConfig {
        cell_timeout: args.cell_timeout,
        ..ProcessKernelConfig::default()
    };
    if let Some(python) = args.python {
        kernel_config.interpreter = python;
    }
    let show_ticker = args.verbosity == Verbosity::Normal && std::io::stderr().is_terminal();
    let mut kernel = Ticker::new(ProcessKernel::new(kernel_config), show_ticker);

    let config = JobConfig {
        output: args.output.unwrap_or_else(|| default_output(&renderer)),
        in_place: args.in_place.then(|| args.notebook.clone()),
        snapshot_interval: args.snapshot_interval,
        verbosity: args.verbosity,
    };
    let output = config.output.clone();

    let report = Job::new(&storage, &renderer, &mut kernel, &LogSink, config)
        .run(document, &args.parameters, &injector)
        .await?;

    tracing::debug!(
        "Report written to {} ({} periodic snapshots, {} failed)",
        output,
        report.snapshots.periodic,
        report.snapshots.failed
    );
    Ok(())
}

fn default_output(renderer: &impl Renderer) -> String {
    format!("output.{}", renderer.extension())
}

/// Report title: the notebook's file name without extension.
fn title(notebook: &str) -> String {
    let name = notebook.rsplit('/').next().unwrap_or(notebook);
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
