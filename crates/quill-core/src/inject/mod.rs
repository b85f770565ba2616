//! Parameter injection for notebook code cells.
//!
//! Parameters are injected by rewriting the first module-level assignment to
//! the parameter's name. Cells are parsed with the cell language's own
//! grammar, the assigned value node is replaced with a literal, and the cell
//! source is regenerated. Nothing outside the replaced node changes.
//!
//! # Architecture
//!
//! ```text
//! code cell ──► CellLanguage::parse ──► first_assignment(name)
//!                     │                        │
//!                     ▼                        ▼
//!                ParseSkip (next cell)   Assignment { span, literal }
//!                                              │
//!                          inject ◄────────────┴────────────► extract
//!               literal(value) + replace(span)           literal value
//! ```

mod parameter;
mod python;

pub use parameter::Parameter;
pub use python::Python;

use serde_json::Value;

use crate::document::Document;
use crate::error::{Error, Result};

/// A cell whose source could not be parsed.
///
/// Not an error: the parameter may legitimately live in another cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSkip {
    pub reason: String,
}

/// Line/column position in cell source (zero-based, column in bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

/// Location of the value sub-tree of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start: Position,
    pub end: Position,
}

/// First assignment to a name within one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Span of the assigned value.
    pub span: SourceSpan,
    /// The assigned value, when it is a literal.
    pub literal: Option<Value>,
}

/// Front end for the language notebook cells are written in.
pub trait CellLanguage {
    /// Parsed syntax tree of one cell.
    type Tree;

    /// Parse a cell. Sources with syntax errors are skipped.
    fn parse(&self, source: &str) -> std::result::Result<Self::Tree, ParseSkip>;

    /// First module-level assignment whose target is exactly `name`.
    fn first_assignment(&self, tree: &Self::Tree, source: &str, name: &str) -> Option<Assignment>;

    /// Source text of a literal that evaluates to `value`.
    fn literal(&self, value: &Value) -> String;

    /// Replace `span` with `literal`, keeping `tree` in sync, and return the new source.
    fn replace(&self, tree: &mut Self::Tree, source: &str, span: &SourceSpan, literal: &str)
    -> String;
}

/// Reads and rewrites parameter assignments in a document.
pub struct ParameterInjector<L = Python> {
    language: L,
}

impl ParameterInjector<Python> {
    /// Injector for Python notebooks.
    pub fn python() -> Result<Self> {
        Ok(Self::new(Python::new()?))
    }
}

impl<L: CellLanguage> ParameterInjector<L> {
    pub fn new(language: L) -> Self {
        Self { language }
    }

    /// Set the first assignment of `name` to `value`.
    ///
    /// Returns `Error::ParameterNotFound` if no code cell assigns `name`.
    pub fn inject(&self, document: &mut Document, name: &str, value: &Value) -> Result<()> {
        for (index, cell) in document.cells.iter_mut().enumerate() {
            let Some(code) = cell.as_code_mut() else {
                continue;
            };
            let mut tree = match self.language.parse(&code.source) {
                Ok(tree) => tree,
                Err(skip) => {
                    tracing::debug!("Skipping cell {}: {}", index + 1, skip.reason);
                    continue;
                }
            };
            if let Some(assignment) = self.language.first_assignment(&tree, &code.source, name) {
                let literal = self.language.literal(value);
                code.source =
                    self.language
                        .replace(&mut tree, &code.source, &assignment.span, &literal);
                tracing::debug!("Set {} = {} in cell {}", name, literal, index + 1);
                return Ok(());
            }
        }

        Err(Error::ParameterNotFound {
            name: name.to_string(),
        })
    }

    /// Value of the first assignment of `name`, or `None` if nothing assigns it.
    ///
    /// Returns `Error::NotALiteral` if the assigned value is not a literal.
    pub fn extract(&self, document: &Document, name: &str) -> Result<Option<Value>> {
        for code in document.code_cells() {
            let Ok(tree) = self.language.parse(&code.source) else {
                continue;
            };
            if let Some(assignment) = self.language.first_assignment(&tree, &code.source, name) {
                return assignment
                    .literal
                    .map(Some)
                    .ok_or_else(|| Error::NotALiteral {
                        name: name.to_string(),
                    });
            }
        }
        Ok(None)
    }

    /// Inject every parameter in order, stopping at the first failure.
    pub fn set_parameters(&self, document: &mut Document, parameters: &[Parameter]) -> Result<()> {
        for parameter in parameters {
            self.inject(document, &parameter.name, &parameter.value)?;
        }
        Ok(())
    }
}
