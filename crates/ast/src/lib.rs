//! # Burrow AST
//!
//! The program schema shared between the burrow interpreter and its host
//! parser. The parser is a collaborator outside this workspace: it produces a
//! tree in the ESTree-like JSON shape documented on [`NodeKind`], and
//! [`AstArena::load_estree`] converts that JSON into the arena form the
//! interpreter executes.
//!
//! Nodes live in an append-only arena and reference each other by [`NodeIx`]
//! index. Execution state and closures therefore hold plain integers, and a
//! whole arena serializes as one self-contained unit inside a world snapshot.

#![warn(rustdoc::missing_crate_level_docs)]

/// Schema errors reported while ingesting host-parser output
pub mod error;
/// ESTree JSON ingestion
pub mod estree;
/// Node, operator, and arena definitions
pub mod node;

pub use error::{AstError, AstResult};
pub use node::{
    AssignOp, AstArena, BinaryOp, LitValue, LogicalOp, Node, NodeIx, NodeKind, UnaryOp, UpdateOp,
};
