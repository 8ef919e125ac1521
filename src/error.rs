//! Error types for the DFI engine
//!
//! Defines the error taxonomy shared by descriptor parsing, JSON
//! marshaling and dynamic invocation. Errors are recorded on the
//! thread-local [`error_stack`](crate::error_stack) at the failure site.

use crate::position::Position;
use thiserror::Error;

/// Top-level error type for all DFI operations
#[derive(Debug, Error)]
pub enum DfiError {
    /// A name (identifier) was expected but nothing matched
    #[error("Parsed empty name")]
    EmptyName { position: Position },

    /// A specific character (or end of input) was expected
    #[error("Error parsing, expected token {expected} got {found} at position {position}")]
    UnexpectedToken {
        expected: String,
        found: String,
        position: Position,
    },

    /// A name/value entry had no value
    #[error("Parsed empty value for '{name}' at position {position}")]
    EmptyValue { name: String, position: Position },

    /// Input ended while a construct was still open
    #[error("Unexpected end of input while parsing {context} at position {position}")]
    UnexpectedEof { context: String, position: Position },

    /// Unsupported type code in a type descriptor
    #[error("Error parsing type, unsupported type code {code:?} at position {position}")]
    UnknownTypeCode { code: char, position: Position },

    /// Reference to a type name that is not in scope
    #[error("unknown type {name}")]
    UnknownType { name: String },

    /// Structurally valid descriptor with invalid meaning
    #[error("{message}")]
    Semantic { message: String },

    #[error("missing version in header section")]
    MissingVersion,

    #[error("missing name in header section")]
    MissingName,

    #[error("Invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("Duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },

    /// Native allocation failure
    #[error("Out of memory allocating {size} bytes")]
    OutOfMemory { size: usize },

    /// JSON value does not fit the target type
    #[error("Expected {expected}, got: {snippet}")]
    ShapeMismatch { expected: String, snippet: String },

    /// Call interface could not be built for a signature
    #[error("Error preparing call interface for {site}: {reason}")]
    CallPreparation { site: String, reason: String },

    #[error("Invalid argument count for '{function}': expected {expected}, got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported {what}")]
    Unsupported { what: String },

    /// Failure inside a descriptor section
    #[error("Error parsing {section} section: {cause}")]
    Section {
        section: String,
        cause: Box<DfiError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for DFI operations
pub type DfiResult<T> = Result<T, DfiError>;

impl DfiError {
    /// Push this error's message onto the thread-local error stack
    pub fn recorded(self) -> Self {
        crate::error_stack::push(self.to_string());
        self
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::Semantic {
            message: message.into(),
        }
    }

    pub fn shape_mismatch(expected: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            snippet: snippet.into(),
        }
    }

    pub fn call_preparation(site: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallPreparation {
            site: site.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Wrap an error with the descriptor section it occurred in
    pub fn in_section(section: &str, cause: DfiError) -> Self {
        Self::Section {
            section: section.to_string(),
            cause: Box::new(cause),
        }
        .recorded()
    }

    /// Innermost cause, unwrapping section context
    pub fn root_cause(&self) -> &DfiError {
        match self {
            DfiError::Section { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// True for native allocation failures
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.root_cause(), DfiError::OutOfMemory { .. })
    }
}

/// Record an error and return it as `Err`
pub(crate) fn fail<T>(error: DfiError) -> DfiResult<T> {
    Err(error.recorded())
}
