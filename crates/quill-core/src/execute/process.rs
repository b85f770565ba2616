//! Python kernel running in a child process.
//!
//! The child runs a small driver script that keeps one module namespace for
//! the whole session and exchanges one JSON object per line with the parent:
//!
//! ```text
//! parent ──► {"command": "execute", "source": "..."}
//! parent ◄── {"status": "ok" | "error", "execution_count": n, "outputs": [...]}
//! parent ──► {"command": "shutdown"}
//! ```
//!
//! Protocol replies go through a private copy of the driver's stdout; the
//! real fd 1 is pointed at stderr so that stray writes from native code
//! cannot corrupt the stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::document::{Cell, Output};
use crate::error::{Error, ExecutionError, Result};

use super::kernel::KernelExecutor;

/// Per-cell time limit used unless configured otherwise.
pub const DEFAULT_CELL_TIMEOUT: Duration = Duration::from_secs(600);

/// How long a shutting-down session may take before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const DRIVER: &str = r#"
import ast
import contextlib
import io
import json
import os
import sys
import tokenize
import traceback

protocol = os.fdopen(os.dup(1), "w", encoding="utf-8")
os.dup2(2, 1)

namespace = {"__name__": "__main__"}
count = 0


def reply(message):
    protocol.write(json.dumps(message) + "\n")
    protocol.flush()


def continued_lines(masked):
    # Rows that begin inside a string, a bracket or after a backslash.
    continued, depth_after, depth = set(), {}, 0
    try:
        for token in tokenize.generate_tokens(io.StringIO(masked + "\n").readline):
            first, last = token.start[0], token.end[0]
            continued.update(range(first + 1, last + 1))
            if token.type == tokenize.OP and token.string in ("(", "[", "{"):
                depth += 1
            elif token.type == tokenize.OP and token.string in (")", "]", "}"):
                depth -= 1
            depth_after[last] = depth
    except (tokenize.TokenError, SyntaxError):
        pass
    open_rows = sorted(row for row, after in depth_after.items() if after > 0)
    for row in open_rows:
        following = [r for r in depth_after if r > row]
        stop = min(following) if following else row + 1
        continued.update(range(row + 1, stop + 1))
    return continued


def strip_directives(source):
    lines = source.splitlines()
    candidates = {
        row for row, line in enumerate(lines, 1) if line.lstrip().startswith(("%", "!"))
    }
    if not candidates:
        return source
    masked = "\n".join("" if row in candidates else line for row, line in enumerate(lines, 1))
    continued = continued_lines(masked)
    directives = {
        row
        for row in candidates
        if row not in continued and not (row > 1 and lines[row - 2].endswith("\\"))
    }
    return "\n".join("" if row in directives else line for row, line in enumerate(lines, 1))


def run(source):
    tree = ast.parse(strip_directives(source), "<cell>", "exec")
    last = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        last = ast.Expression(tree.body.pop().value)
    exec(compile(tree, "<cell>", "exec"), namespace)
    if last is not None:
        return eval(compile(last, "<cell>", "eval"), namespace)


reply({"status": "ready"})
for line in sys.stdin:
    request = json.loads(line)
    if request.get("command") == "shutdown":
        break
    count += 1
    out, err = io.StringIO(), io.StringIO()
    status, outputs, value, error = "ok", [], None, None
    with contextlib.redirect_stdout(out), contextlib.redirect_stderr(err):
        try:
            value = run(request["source"])
        except BaseException as exc:
            status = "error"
            error = {
                "output_type": "error",
                "ename": type(exc).__name__,
                "evalue": str(exc),
                "traceback": traceback.format_exception(type(exc), exc, exc.__traceback__),
            }
    for name, buffer in (("stdout", out), ("stderr", err)):
        if buffer.getvalue():
            outputs.append({"output_type": "stream", "name": name, "text": buffer.getvalue()})
    if error is not None:
        outputs.append(error)
    elif value is not None:
        outputs.append({
            "output_type": "execute_result",
            "execution_count": count,
            "data": {"text/plain": repr(value)},
            "metadata": {},
        })
    reply({"status": status, "execution_count": count, "outputs": outputs})
"#;

/// Configuration for [`ProcessKernel`].
#[derive(Debug, Clone)]
pub struct ProcessKernelConfig {
    /// Python interpreter to run the session with.
    pub interpreter: PathBuf,
    /// Limit for a single cell; `None` waits forever.
    pub cell_timeout: Option<Duration>,
}

impl Default for ProcessKernelConfig {
    fn default() -> Self {
        Self {
            interpreter: which::which("python3").unwrap_or_else(|_| PathBuf::from("python3")),
            cell_timeout: Some(DEFAULT_CELL_TIMEOUT),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum DriverRequest<'a> {
    Execute { source: &'a str },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DriverResponse {
    Ready,
    Ok {
        execution_count: u32,
        outputs: Vec<Output>,
    },
    Error {
        execution_count: u32,
        outputs: Vec<Output>,
    },
}

/// A live interpreter process.
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Session {
    async fn spawn(config: &ProcessKernelConfig) -> Result<Self> {
        let mut child = Command::new(&config.interpreter)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Kernel(format!(
                    "failed to start '{}': {}",
                    config.interpreter.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Kernel("kernel stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Kernel("kernel stdout unavailable".to_string()))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };
        match session.receive().await? {
            DriverResponse::Ready => {
                tracing::debug!("Kernel started ({})", config.interpreter.display());
                Ok(session)
            }
            other => Err(Error::Kernel(format!(
                "unexpected kernel greeting: {:?}",
                other
            ))),
        }
    }

    async fn send(&mut self, request: &DriverRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| Error::Kernel(format!("failed to reach kernel: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::Kernel(format!("failed to reach kernel: {e}")))
    }

    async fn receive(&mut self) -> Result<DriverResponse> {
        let line = self
            .stdout
            .next_line()
            .await
            .map_err(|e| Error::Kernel(format!("failed to read from kernel: {e}")))?
            .ok_or_else(|| Error::Kernel("kernel exited unexpectedly".to_string()))?;
        serde_json::from_str(&line)
            .map_err(|e| Error::Kernel(format!("malformed kernel reply: {e}")))
    }

    async fn execute(&mut self, source: &str) -> Result<DriverResponse> {
        self.send(&DriverRequest::Execute { source }).await?;
        self.receive().await
    }

    async fn close(mut self) {
        let _ = self.send(&DriverRequest::Shutdown).await;
        drop(self.stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Kernel exited with {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for kernel: {}", e),
            Err(_) => {
                tracing::warn!("Kernel did not exit in time, killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Python kernel backed by a persistent child process.
///
/// The process is started on the first code cell, so documents without code
/// never spawn an interpreter. A cell that exceeds the timeout kills the
/// session.
pub struct ProcessKernel {
    config: ProcessKernelConfig,
    session: Option<Session>,
}

impl ProcessKernel {
    pub fn new(config: ProcessKernelConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Whether an interpreter process is currently running.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }
}

impl Default for ProcessKernel {
    fn default() -> Self {
        Self::new(ProcessKernelConfig::default())
    }
}

#[async_trait]
impl KernelExecutor for ProcessKernel {
    async fn execute(&mut self, cell: &mut Cell, index: usize) -> Result<()> {
        let Some(code) = cell.as_code_mut() else {
            return Ok(());
        };

        let mut session = match self.session.take() {
            Some(session) => session,
            None => Session::spawn(&self.config).await?,
        };
        let exchange = session.execute(&code.source);
        let response = match self.config.cell_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                Error::Kernel(format!(
                    "cell {} timed out after {} seconds",
                    index + 1,
                    limit.as_secs()
                ))
            })?,
            None => exchange.await,
        }?;
        self.session = Some(session);

        match response {
            DriverResponse::Ok {
                execution_count,
                outputs,
            } => {
                code.execution_count = Some(execution_count);
                code.outputs = outputs;
                Ok(())
            }
            DriverResponse::Error {
                execution_count,
                outputs,
            } => {
                code.execution_count = Some(execution_count);
                code.outputs = outputs;
                Err(execution_error(index, &code.outputs).into())
            }
            DriverResponse::Ready => Err(Error::Kernel(
                "kernel answered an execute request with a greeting".to_string(),
            )),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        Ok(())
    }
}

fn execution_error(index: usize, outputs: &[Output]) -> ExecutionError {
    outputs
        .iter()
        .find_map(|output| match output {
            Output::Error {
                ename,
                evalue,
                traceback,
            } => Some(ExecutionError {
                index,
                ename: ename.clone(),
                evalue: evalue.clone(),
                traceback: traceback.clone(),
            }),
            _ => None,
        })
        .unwrap_or_else(|| ExecutionError {
            index,
            ename: "Error".to_string(),
            evalue: "kernel reported a failure without details".to_string(),
            traceback: Vec::new(),
        })
}
