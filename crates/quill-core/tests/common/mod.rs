//! Shared fixtures for quill-core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quill_core::document::{Cell, Document, Output};
use quill_core::error::{ExecutionError, Result};
use quill_core::execute::{KernelExecutor, ProgressEvent, ProgressSink};

/// Kernel understanding a tiny line-based language:
///
/// - `name = value` binds a value (text after `=`, trimmed)
/// - `print(name)` writes the bound value, or raises `NameError`
/// - `sleep(secs)` waits on the tokio clock
/// - `other(...)` raises `NameError`
/// - lines starting with `%` or `#` are ignored
#[derive(Default)]
pub struct ScriptedKernel {
    pub scope: HashMap<String, String>,
    pub executed: Vec<usize>,
    count: u32,
}

impl ScriptedKernel {
    fn run_line(&mut self, line: &str, out: &mut String) -> std::result::Result<(), String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            return Ok(());
        }
        if let Some((callee, rest)) = line.split_once('(') {
            let argument = rest.trim_end_matches(')').trim();
            return match callee.trim() {
                "print" => match self.scope.get(argument) {
                    Some(value) => {
                        out.push_str(value);
                        out.push('\n');
                        Ok(())
                    }
                    None => Err(argument.to_string()),
                },
                "sleep" => Ok(()),
                name => Err(name.to_string()),
            };
        }
        if let Some((name, value)) = line.split_once('=') {
            self.scope
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl KernelExecutor for ScriptedKernel {
    async fn execute(&mut self, cell: &mut Cell, index: usize) -> Result<()> {
        self.executed.push(index);
        let Some(code) = cell.as_code_mut() else {
            return Ok(());
        };
        self.count += 1;
        code.execution_count = Some(self.count);

        let mut stdout = String::new();
        let mut failure = None;
        for line in code.source.lines() {
            if let Some(secs) = line
                .trim()
                .strip_prefix("sleep(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|secs| secs.parse::<u64>().ok())
            {
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            if let Err(name) = self.run_line(line, &mut stdout) {
                failure = Some(name);
                break;
            }
        }

        if !stdout.is_empty() {
            code.outputs.push(Output::stdout(stdout));
        }
        if let Some(name) = failure {
            let evalue = format!("name '{name}' is not defined");
            code.outputs.push(Output::Error {
                ename: "NameError".to_string(),
                evalue: evalue.clone(),
                traceback: vec![format!("NameError: {evalue}")],
            });
            return Err(ExecutionError {
                index,
                ename: "NameError".to_string(),
                evalue,
                traceback: Vec::new(),
            }
            .into());
        }
        Ok(())
    }
}

/// Sink that keeps every event.
#[derive(Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn notebook(sources: &[&str]) -> Document {
    Document::new(sources.iter().map(|source| Cell::code(*source)).collect())
}
