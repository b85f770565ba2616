//! Elapsed-time spinner drawn on stderr while a cell runs.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::{Cell, KernelExecutor, Result};
use tokio::time::Instant;

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
const TICK: Duration = Duration::from_millis(100);

/// Kernel wrapper that shows `...{secs}s` plus a spinner during each code cell.
pub struct Ticker<K> {
    inner: K,
    enabled: bool,
}

impl<K: KernelExecutor> Ticker<K> {
    pub fn new(inner: K, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

fn frame(elapsed: Duration, tick: usize) -> String {
    format!(
        "...{:.1}s {}",
        elapsed.as_secs_f64(),
        SPINNER[tick % SPINNER.len()]
    )
}

#[async_trait]
impl<K: KernelExecutor> KernelExecutor for Ticker<K> {
    async fn start(&mut self) -> Result<()> {
        self.inner.start().await
    }

    async fn execute(&mut self, cell: &mut Cell, index: usize) -> Result<()> {
        if !self.enabled || !cell.is_code() {
            return self.inner.execute(cell, index).await;
        }

        let started = Instant::now();
        let work = self.inner.execute(cell, index);
        tokio::pin!(work);

        let mut stderr = std::io::stderr();
        let mut width = 0;
        let mut tick = 0;
        let result = loop {
            let line = frame(started.elapsed(), tick);
            width = width.max(line.len());
            let _ = write!(stderr, "{line}\r");
            let _ = stderr.flush();
            tick += 1;

            tokio::select! {
                result = &mut work => break result,
                _ = tokio::time::sleep(TICK) => {}
            }
        };

        let _ = write!(stderr, "{}\r", " ".repeat(width));
        let _ = stderr.flush();
        result
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await
    }
}
