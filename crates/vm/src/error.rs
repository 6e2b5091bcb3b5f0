//! Error types for the burrow interpreter core.
//!
//! Host-domain failures only. Errors raised by *user* programs are
//! `Error`-class pseudo-objects and travel through the abrupt-completion
//! channel of the step engine; they never appear here, and nothing here is
//! ever surfaced to user code.

use thiserror::Error;

/// Host-side interpreter errors.
///
/// Any of these during a step indicates a bug or corrupted input; the
/// affected thread is killed and the error is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A program handle or node index that this interpreter never issued
    #[error("Invalid program reference: {reason}")]
    InvalidProgram { reason: String },

    /// The continuation arena disagrees with itself
    #[error("Corrupt execution state: {reason}")]
    StateCorrupt { reason: String },

    /// An operation named a thread this interpreter does not own
    #[error("No such thread: {id}")]
    NoSuchThread { id: u64 },

    /// Native-table registration failure (duplicate id, or table sealed)
    #[error("Native registration failed for {id}: {reason}")]
    NativeRegistration { id: String, reason: String },

    /// A function object references a native id absent from the table
    #[error("Unknown native function: {id}")]
    UnknownNative { id: String },

    /// A construct the engine does not evaluate
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Per-thread continuation arena grew past the configured limit
    #[error("State limit exceeded: {count} states, limit {limit}")]
    StateLimitExceeded { count: usize, limit: usize },

    /// Snapshot encoding failure
    #[error("Snapshot error: {reason}")]
    Snapshot { reason: String },

    /// Program-schema ingestion failure
    #[error("Program schema error: {0}")]
    Ast(#[from] burrow_ast::AstError),
}

impl EngineError {
    /// Creates an invalid-program error.
    pub fn invalid_program<S: Into<String>>(reason: S) -> Self {
        Self::InvalidProgram {
            reason: reason.into(),
        }
    }

    /// Creates a corrupt-state error.
    pub fn state_corrupt<S: Into<String>>(reason: S) -> Self {
        Self::StateCorrupt {
            reason: reason.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates a snapshot-encoding error.
    pub fn snapshot<S: Into<String>>(reason: S) -> Self {
        Self::Snapshot {
            reason: reason.into(),
        }
    }

    /// Returns true when the error indicates corrupted interpreter state
    /// rather than bad host input.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            EngineError::StateCorrupt { .. } | EngineError::StateLimitExceeded { .. }
        )
    }
}

/// Result type for interpreter operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Snapshot decode errors.
///
/// Every variant is raised before any decoded structure is committed, so a
/// failed [`restore`](crate::interp::Interpreter::restore) leaves the
/// interpreter exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The top level is not an ordered record array with an interpreter
    /// record in slot 0, or a record is missing a required field
    #[error("Snapshot shape error: {reason}")]
    Shape { reason: String },

    /// A `{"#": n}` reference points outside the record array
    #[error("Dangling snapshot reference: record {index}")]
    DanglingReference { index: usize },

    /// A reference resolved to a record of the wrong kind
    #[error("Snapshot reference to record {index} is not a {expected}")]
    RefType { index: usize, expected: &'static str },

    /// A record carries a `type` tag this decoder does not know
    #[error("Unknown snapshot record type: {tag}")]
    UnknownType { tag: String },

    /// A Date record payload is not ISO-8601
    #[error("Invalid date payload: {data}")]
    InvalidDate { data: String },

    /// A Function record names a native id absent from the table
    #[error("Snapshot references unknown native function: {id}")]
    MissingNative { id: String },

    /// Applying the recorded prototypes would create a cycle
    #[error("Prototype cycle at record {index}")]
    PrototypeCycle { index: usize },

    /// The snapshot format version is newer than this decoder
    #[error("Unsupported snapshot version: {version}")]
    UnsupportedVersion { version: u64 },
}

impl DecodeError {
    /// Creates a shape error.
    pub fn shape<S: Into<String>>(reason: S) -> Self {
        Self::Shape {
            reason: reason.into(),
        }
    }

    /// Maps the error onto the user-facing taxonomy name reported at the
    /// host boundary.
    pub fn taxonomy(&self) -> &'static str {
        match self {
            DecodeError::Shape { .. } => "ShapeError",
            DecodeError::DanglingReference { .. } | DecodeError::RefType { .. } => {
                "ReferenceError"
            }
            DecodeError::UnknownType { .. }
            | DecodeError::InvalidDate { .. }
            | DecodeError::PrototypeCycle { .. }
            | DecodeError::UnsupportedVersion { .. } => "TypeError",
            DecodeError::MissingNative { .. } => "RangeError",
        }
    }
}
