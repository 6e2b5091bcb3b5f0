//! Error types for program-schema ingestion.

use thiserror::Error;

/// Errors raised while converting host-parser JSON into arena nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AstError {
    /// The JSON value is not an object with a `type` field
    #[error("Malformed node: {reason}")]
    Malformed { reason: String },

    /// A `type` tag this schema does not define
    #[error("Unsupported node type: {node_type}")]
    UnsupportedNode { node_type: String },

    /// A required field is absent or has the wrong JSON shape
    #[error("Node {node_type} is missing field {field}")]
    MissingField {
        node_type: String,
        field: &'static str,
    },

    /// An operator token outside the language subset
    #[error("Unknown operator: {operator}")]
    UnknownOperator { operator: String },

    /// A property form the language subset does not admit
    #[error("Unsupported property kind: {kind}")]
    UnsupportedProperty { kind: String },
}

impl AstError {
    /// Creates a malformed-node error.
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates a missing-field error.
    pub fn missing_field<S: Into<String>>(node_type: S, field: &'static str) -> Self {
        Self::MissingField {
            node_type: node_type.into(),
            field,
        }
    }

    /// Creates an unknown-operator error.
    pub fn unknown_operator<S: Into<String>>(operator: S) -> Self {
        Self::UnknownOperator {
            operator: operator.into(),
        }
    }
}

/// Result type for schema ingestion.
pub type AstResult<T> = std::result::Result<T, AstError>;
