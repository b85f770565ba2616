//! Notebook document model (nbformat v4).
//!
//! A [`Document`] is the in-memory form of a `.ipynb` file. Notebook-level
//! metadata and unknown fields are carried through untouched so that an
//! in-place write reproduces everything the job did not change.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// MIME bundle of a rich output (`text/plain`, `text/html`, `image/png`, ...).
pub type MimeBundle = Map<String, Value>;

/// A Jupyter notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Notebook cells, in execution order.
    pub cells: Vec<Cell>,

    /// Notebook metadata (kernelspec, language info, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Format version (always 4)
    pub nbformat: u32,

    /// Minor format version
    pub nbformat_minor: u32,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    /// Executable code.
    Code(CodeCell),
    /// Markdown text.
    Markdown(TextCell),
    /// Raw text passed through untouched.
    Raw(TextCell),
}

/// A code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Cell source.
    #[serde(with = "multiline")]
    pub source: String,

    /// Outputs recorded by the kernel.
    #[serde(default)]
    pub outputs: Vec<Output>,

    /// Execution counter, unset until the kernel runs the cell.
    #[serde(default)]
    pub execution_count: Option<u32>,
}

/// A markdown or raw cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(with = "multiline")]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
}

/// Cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Standard output/error
    Stream {
        name: String,
        #[serde(with = "multiline")]
        text: String,
    },

    /// Result of the last expression of a cell
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Display data
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Error output
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Document {
    /// Create an nbformat 4.5 document from cells.
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: 4,
            nbformat_minor: 5,
            extra: Map::new(),
        }
    }

    /// Decode a notebook from `.ipynb` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let document: Self = serde_json::from_slice(bytes)?;
        if document.nbformat != 4 {
            return Err(Error::Document(format!(
                "unsupported nbformat {} (expected 4)",
                document.nbformat
            )));
        }
        Ok(document)
    }

    /// Encode the notebook as `.ipynb` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the notebook has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over code cells in document order.
    pub fn code_cells(&self) -> impl Iterator<Item = &CodeCell> {
        self.cells.iter().filter_map(Cell::as_code)
    }

    /// Drop all outputs and execution counters.
    pub fn clean(&mut self) {
        for cell in &mut self.cells {
            if let Cell::Code(code) = cell {
                code.outputs.clear();
                code.execution_count = None;
            }
        }
    }

    /// Whether every cell is free of outputs and execution counters.
    pub fn is_clean(&self) -> bool {
        self.code_cells()
            .all(|code| code.outputs.is_empty() && code.execution_count.is_none())
    }
}

impl Cell {
    /// Create a code cell.
    pub fn code(source: impl Into<String>) -> Self {
        Cell::Code(CodeCell {
            id: None,
            metadata: Map::new(),
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
        })
    }

    /// Create a markdown cell.
    pub fn markdown(source: impl Into<String>) -> Self {
        Cell::Markdown(TextCell {
            id: None,
            metadata: Map::new(),
            source: source.into(),
            attachments: None,
        })
    }

    /// Whether this is a code cell.
    pub fn is_code(&self) -> bool {
        matches!(self, Cell::Code(_))
    }

    pub fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Cell::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Cell::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Cell source text.
    pub fn source(&self) -> &str {
        match self {
            Cell::Code(code) => &code.source,
            Cell::Markdown(text) | Cell::Raw(text) => &text.source,
        }
    }

    /// Outputs of the cell; always empty for non-code cells.
    pub fn outputs(&self) -> &[Output] {
        match self {
            Cell::Code(code) => &code.outputs,
            _ => &[],
        }
    }

    /// Execution counter of a code cell.
    pub fn execution_count(&self) -> Option<u32> {
        self.as_code().and_then(|code| code.execution_count)
    }

    /// Concatenation of every stream output of the cell.
    ///
    /// Outputs without text contribute nothing.
    pub fn stream_text(&self) -> String {
        self.outputs().iter().filter_map(Output::text).collect()
    }
}

impl Output {
    /// Create a stdout stream output.
    pub fn stdout(text: impl Into<String>) -> Self {
        Output::Stream {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }

    /// Stream text, if this is a stream output.
    pub fn text(&self) -> Option<&str> {
        match self {
            Output::Stream { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Document shared by the orchestrator (writer) and the snapshot writer (reader).
///
/// Both run as futures on the same task, so a `RefCell` is enough. Borrows
/// never outlive a single synchronous step, in particular they are never held
/// across an await.
#[derive(Debug)]
pub struct LiveDocument {
    inner: RefCell<Document>,
}

impl LiveDocument {
    pub fn new(document: Document) -> Self {
        Self {
            inner: RefCell::new(document),
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Owned copy of the cell at `index`.
    pub fn cell(&self, index: usize) -> Option<Cell> {
        self.inner.borrow().cells.get(index).cloned()
    }

    /// Replace the cell at `index` in one step.
    pub fn store(&self, index: usize, cell: Cell) {
        if let Some(slot) = self.inner.borrow_mut().cells.get_mut(index) {
            *slot = cell;
        }
    }

    /// Run `f` against the current state of the document.
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&*self.inner.borrow())
    }

    pub fn into_inner(self) -> Document {
        self.inner.into_inner()
    }
}

/// nbformat multiline strings: accepted as a string or a list of lines,
/// written as a list of lines.
mod multiline {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Multiline {
        Joined(String),
        Lines(Vec<String>),
    }

    pub fn serialize<S: Serializer>(text: &str, serializer: S) -> Result<S::Ok, S::Error> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        lines.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Multiline::deserialize(deserializer)? {
            Multiline::Joined(text) => text,
            Multiline::Lines(lines) => lines.concat(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_CELL: &str = r##"{
 "cells": [
  {
   "cell_type": "code",
   "execution_count": 3,
   "metadata": {},
   "outputs": [
    {"output_type": "stream", "name": "stdout", "text": ["Starting Cell 1...\n", "Finished Cell 1\n"]}
   ],
   "source": ["print(\"Starting Cell 1...\")\n", "print(\"Finished Cell 1\")\n"]
  },
  {
   "cell_type": "markdown",
   "metadata": {},
   "source": "# Title"
  }
 ],
 "metadata": {"kernelspec": {"name": "python3", "language": "python", "display_name": "Python 3"}},
 "nbformat": 4,
 "nbformat_minor": 4
}"##;

    #[test]
    fn test_load_multiline_sources() {
        let doc = Document::from_bytes(ONE_CELL.as_bytes()).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(
            doc.cells[0].source(),
            "print(\"Starting Cell 1...\")\nprint(\"Finished Cell 1\")\n"
        );
        assert_eq!(doc.cells[1].source(), "# Title");
        assert_eq!(
            doc.cells[0].stream_text(),
            "Starting Cell 1...\nFinished Cell 1\n"
        );
    }

    #[test]
    fn test_serialization_roundtrip() {
        let doc = Document::from_bytes(ONE_CELL.as_bytes()).unwrap();
        let bytes = doc.to_bytes().unwrap();
        let reloaded = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc, reloaded);

        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["cells"][0]["source"].as_array().unwrap().len(), 2);
        assert!(json["cells"][1].get("outputs").is_none());
    }

    #[test]
    fn test_unknown_top_level_fields_survive() {
        let mut json: Value = serde_json::from_str(ONE_CELL).unwrap();
        json["custom"] = serde_json::json!({"kept": true});
        let doc = Document::from_bytes(json.to_string().as_bytes()).unwrap();
        let out: Value = serde_json::from_slice(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(out["custom"]["kept"], Value::Bool(true));
    }

    #[test]
    fn test_rejects_old_nbformat() {
        let json = r#"{"cells": [], "metadata": {}, "nbformat": 3, "nbformat_minor": 0}"#;
        assert!(matches!(
            Document::from_bytes(json.as_bytes()),
            Err(Error::Document(_))
        ));
    }

    #[test]
    fn test_clean_is_idempotent() {
        let mut doc = Document::from_bytes(ONE_CELL.as_bytes()).unwrap();
        assert!(!doc.is_clean());

        doc.clean();
        assert!(doc.is_clean());
        assert_eq!(doc.cells[0].execution_count(), None);

        let once = doc.clone();
        doc.clean();
        assert_eq!(doc, once);
        assert!(doc.is_clean());
    }

    #[test]
    fn test_cleaned_code_cell_serializes_null_count() {
        let mut doc = Document::from_bytes(ONE_CELL.as_bytes()).unwrap();
        doc.clean();
        let json: Value = serde_json::from_slice(&doc.to_bytes().unwrap()).unwrap();
        assert_eq!(json["cells"][0]["execution_count"], Value::Null);
        assert_eq!(json["cells"][0]["outputs"], serde_json::json!([]));
    }

    #[test]
    fn test_stream_text_ignores_payloads_without_text() {
        let mut cell = Cell::code("1 + 1");
        if let Some(code) = cell.as_code_mut() {
            code.outputs.push(Output::ExecuteResult {
                execution_count: Some(1),
                data: MimeBundle::new(),
                metadata: Map::new(),
            });
        }
        assert_eq!(cell.stream_text(), "");
        assert_eq!(Cell::markdown("text").stream_text(), "");
    }

    #[test]
    fn test_live_document_store_replaces_cell() {
        let live = LiveDocument::new(Document::new(vec![Cell::code("x = 1")]));
        let mut cell = live.cell(0).unwrap();
        if let Some(code) = cell.as_code_mut() {
            code.outputs.push(Output::stdout("1\n"));
            code.execution_count = Some(1);
        }
        live.store(0, cell);
        assert_eq!(live.read(|doc| doc.cells[0].stream_text()), "1\n");
        assert!(live.cell(1).is_none());
        assert!(!live.into_inner().is_clean());
    }
}
