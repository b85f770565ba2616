//! Error types for quill-core.

use thiserror::Error;

/// Result type for quill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No code cell assigns the parameter at module level.
    #[error("Variable {name} not found")]
    ParameterNotFound { name: String },

    /// The parameter is assigned something other than a literal.
    #[error("Variable {name} is not assigned a literal value")]
    NotALiteral { name: String },

    /// A command-line parameter was not of the form `name=value`.
    #[error("invalid parameter '{0}': expected name=value")]
    InvalidParameter(String),

    /// A cell raised an error inside the kernel.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The kernel itself failed (spawn, transport, timeout).
    #[error("kernel error: {0}")]
    Kernel(String),

    /// A single storage read or write failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// A storage location could not be parsed.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// The notebook document is malformed or unsupported.
    #[error("invalid notebook: {0}")]
    Document(String),

    /// The renderer could not produce a report.
    #[error("render error: {0}")]
    Render(String),

    /// Invalid operation (e.g. running an orchestrator twice).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The job aborted and the mandatory final snapshot failed as well.
    #[error("{cause}; the final snapshot also failed: {flush}")]
    FinalFlush { cause: Box<Error>, flush: Box<Error> },
}

impl Error {
    /// Format the error with a recovery hint for the operator, when one applies.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            Error::ParameterNotFound { .. } => Some(
                "Maybe in a cell with a magic command? Cells that fail to parse are skipped.",
            ),
            Error::NotALiteral { .. } => {
                Some("only numbers, strings, booleans, None, lists and dicts can be read back")
            }
            Error::InvalidParameter(_) => Some("pass parameters as name=value, e.g. alpha=0.5"),
            Error::Execution(_) => {
                Some("the report contains every output up to and including the failing cell")
            }
            Error::FinalFlush { cause, .. } => cause.hint(),
            _ => None,
        }
    }

    /// The cell execution error behind this error, if any.
    pub fn execution_error(&self) -> Option<&ExecutionError> {
        match self {
            Error::Execution(err) => Some(err),
            Error::FinalFlush { cause, .. } => cause.execution_error(),
            _ => None,
        }
    }
}

/// A cell failed inside the kernel.
///
/// Carries the zero-based index of the failing cell and the error detail the
/// kernel reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cell {} raised {ename}: {evalue}", .index + 1)]
pub struct ExecutionError {
    /// Zero-based index of the failing cell in the document.
    pub index: usize,
    /// Error category (e.g. `NameError`).
    pub ename: String,
    /// Error message.
    pub evalue: String,
    /// Traceback lines as reported by the kernel.
    pub traceback: Vec<String>,
}

/// A single storage read or write failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to {action} {location}: {message}")]
pub struct PersistError {
    /// `"read"` or `"write"`.
    pub action: &'static str,
    /// The location string as given by the caller.
    pub location: String,
    /// Backend error message.
    pub message: String,
}
