//! Progress reporting for a notebook run.
//!
//! [`Progress`] turns the cell range of a document into a single-pass
//! iterator. Pulling an index announces the cell, pulling the next one
//! reports what the previous cell printed, and exhausting the iterator emits
//! one summary with the wall-clock time since the first pull. Events go to a
//! [`ProgressSink`]; nothing here influences execution.

use std::iter::FusedIterator;
use std::time::Duration;

use tokio::time::Instant;

use crate::document::LiveDocument;

/// How much progress to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Report nothing.
    Quiet,
    /// Report every cell and the summary.
    #[default]
    Normal,
}

/// A progress event. Cell indices are one-based.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A cell is about to execute.
    CellStarted {
        index: usize,
        total: usize,
        source: String,
    },
    /// A cell finished; `output` is the concatenated stream text.
    CellFinished {
        index: usize,
        total: usize,
        output: String,
    },
    /// Every cell ran.
    Finished { total: usize, elapsed: Duration },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Writes progress through `tracing` at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::CellStarted {
                index,
                total,
                source,
            } => {
                tracing::info!("Cell {}/{}:", index, total);
                tracing::info!("---------");
                tracing::info!("Input:");
                tracing::info!("{}", source);
            }
            ProgressEvent::CellFinished { output, .. } => {
                tracing::info!("Output:");
                tracing::info!("{}", output);
            }
            ProgressEvent::Finished { elapsed, .. } => {
                tracing::info!("==========");
                tracing::info!("Execution finished in {:.1} seconds", elapsed.as_secs_f64());
            }
        }
    }
}

/// Single-pass iterator over the cell indices of a document.
pub struct Progress<'a> {
    document: &'a LiveDocument,
    sink: &'a dyn ProgressSink,
    verbosity: Verbosity,
    total: usize,
    next: usize,
    /// Cell announced but not yet reported as finished.
    pending: Option<usize>,
    started: Option<Instant>,
    done: bool,
}

impl<'a> Progress<'a> {
    pub fn new(document: &'a LiveDocument, sink: &'a dyn ProgressSink, verbosity: Verbosity) -> Self {
        Self {
            total: document.len(),
            document,
            sink,
            verbosity,
            next: 0,
            pending: None,
            started: None,
            done: false,
        }
    }

    /// Stop early: report the cell in flight, skip the summary and fuse.
    pub fn abort(&mut self) {
        self.finish_pending();
        self.done = true;
    }

    fn emit(&self, event: ProgressEvent) {
        if self.verbosity != Verbosity::Quiet {
            self.sink.on_event(&event);
        }
    }

    fn finish_pending(&mut self) {
        if let Some(index) = self.pending.take() {
            let output = self
                .document
                .read(|doc| doc.cells.get(index).map(|cell| cell.stream_text()))
                .unwrap_or_default();
            self.emit(ProgressEvent::CellFinished {
                index: index + 1,
                total: self.total,
                output,
            });
        }
    }
}

impl Iterator for Progress<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.finish_pending();

        if self.next < self.total {
            let index = self.next;
            self.next += 1;
            let source = self
                .document
                .read(|doc| doc.cells.get(index).map(|cell| cell.source().to_string()))
                .unwrap_or_default();
            self.emit(ProgressEvent::CellStarted {
                index: index + 1,
                total: self.total,
                source,
            });
            self.pending = Some(index);
            return Some(index);
        }

        self.done = true;
        self.emit(ProgressEvent::Finished {
            total: self.total,
            elapsed: started.elapsed(),
        });
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done { 0 } else { self.total - self.next };
        (remaining, Some(remaining))
    }
}

impl FusedIterator for Progress<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Cell, Document, Output};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl Recorder {
        fn events(&self) -> Vec<ProgressEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for Recorder {
        fn on_event(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn run_cell(live: &LiveDocument, index: usize, text: &str) {
        let mut cell = live.cell(index).unwrap();
        if let Some(code) = cell.as_code_mut() {
            code.outputs.push(Output::stdout(text));
        }
        live.store(index, cell);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_cell_order() {
        let live = LiveDocument::new(Document::new(vec![
            Cell::code("print(1)"),
            Cell::markdown("# notes"),
            Cell::code("print(2)"),
        ]));
        let recorder = Recorder::default();
        let mut progress = Progress::new(&live, &recorder, Verbosity::Normal);

        let mut seen = Vec::new();
        while let Some(index) = progress.next() {
            seen.push(index);
            tokio::time::advance(Duration::from_millis(500)).await;
            run_cell(&live, index, &format!("{}\n", index + 1));
        }
        assert_eq!(seen, vec![0, 1, 2]);

        let events = recorder.events();
        assert_eq!(events.len(), 7);
        assert_eq!(
            events[0],
            ProgressEvent::CellStarted {
                index: 1,
                total: 3,
                source: "print(1)".to_string()
            }
        );
        assert_eq!(
            events[1],
            ProgressEvent::CellFinished {
                index: 1,
                total: 3,
                output: "1\n".to_string()
            }
        );
        // Markdown cells have no outputs.
        assert_eq!(
            events[3],
            ProgressEvent::CellFinished {
                index: 2,
                total: 3,
                output: String::new()
            }
        );
        assert_eq!(
            events[6],
            ProgressEvent::Finished {
                total: 3,
                elapsed: Duration::from_millis(1500)
            }
        );

        let started: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::CellStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2, 3]);
    }

    #[test]
    fn test_iterator_is_single_pass() {
        let live = LiveDocument::new(Document::new(vec![Cell::code("x = 1")]));
        let recorder = Recorder::default();
        let mut progress = Progress::new(&live, &recorder, Verbosity::Normal);

        assert_eq!(progress.size_hint(), (1, Some(1)));
        assert_eq!(progress.next(), Some(0));
        assert_eq!(progress.next(), None);
        assert_eq!(progress.next(), None);
        let summaries = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { .. }))
            .count();
        assert_eq!(summaries, 1);
    }

    #[test]
    fn test_empty_document_still_reports_summary() {
        let live = LiveDocument::new(Document::new(Vec::new()));
        let recorder = Recorder::default();
        let mut progress = Progress::new(&live, &recorder, Verbosity::Normal);
        assert_eq!(progress.next(), None);
        assert!(matches!(
            recorder.events().as_slice(),
            [ProgressEvent::Finished { total: 0, .. }]
        ));
    }

    #[test]
    fn test_quiet_reports_nothing() {
        let live = LiveDocument::new(Document::new(vec![Cell::code("x = 1")]));
        let recorder = Recorder::default();
        let indices: Vec<usize> = Progress::new(&live, &recorder, Verbosity::Quiet).collect();
        assert_eq!(indices, vec![0]);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_abort_reports_cell_in_flight_without_summary() {
        let live = LiveDocument::new(Document::new(vec![
            Cell::code("print('a')"),
            Cell::code("boom"),
        ]));
        let recorder = Recorder::default();
        let mut progress = Progress::new(&live, &recorder, Verbosity::Normal);

        assert_eq!(progress.next(), Some(0));
        run_cell(&live, 0, "a\n");
        progress.abort();
        assert_eq!(progress.next(), None);

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProgressEvent::CellFinished { index: 1, .. }));
    }
}
