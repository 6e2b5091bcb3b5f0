//! # Burrow VM
//!
//! A persistent, checkpointable interpreter for a JavaScript-family
//! language, built for a long-lived shared-world process. User programs run
//! against a managed pseudo-heap that is disjoint from the host's own
//! objects, many scripts make progress inside one native thread, and the
//! whole live interpreter, every object, closure, suspended expression, and
//! fiber, serializes to a portable record array and resumes in a fresh
//! process exactly where it stopped.
//!
//! ## Features
//!
//! - **Stepwise Execution**: every AST node evaluates through an explicit,
//!   suspendable state record; nothing blocks between steps
//! - **Cooperative Fibers**: a time-sliced round-robin scheduler with
//!   sleeping and I/O-blocked queues inside a single native thread
//! - **World Snapshots**: reachability-walked, shared-substructure-aware
//!   encoding with two-pass rehydration
//! - **Native Table**: host built-ins registered under stable string ids,
//!   referenced by id across snapshots
//! - **Weak Containers**: iterable weak maps and sets with
//!   drop-on-observation semantics
//!
//! ## Architecture
//!
//! - **Interpreter**: world root, host boundary, scheduler loop
//! - **StateArena**: suspended continuations as arena-indexed records
//! - **PsObject**: prototype-linked user objects with attribute bits
//! - **Scheduler**: runnable queue, wake heap, blocker table
//! - **snapshot**: encoder and two-pass decoder for the record format
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_vm::{Interpreter, RunState};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut interp = Interpreter::new()?;
//! let program = interp.load_program(&json!({
//!     "type": "Program",
//!     "body": [{
//!         "type": "ExpressionStatement",
//!         "expression": {
//!             "type": "BinaryExpression",
//!             "operator": "+",
//!             "left": {"type": "Literal", "value": 40},
//!             "right": {"type": "Literal", "value": 2}
//!         }
//!     }]
//! }))?;
//! let thread = interp.spawn(program)?;
//! assert_eq!(interp.run(10_000)?, RunState::Done);
//! assert_eq!(interp.thread_result(thread).unwrap().to_number(), 42.0);
//!
//! // Checkpoint the world and bring it back elsewhere.
//! let records = interp.snapshot()?;
//! let mut revived = Interpreter::new()?;
//! revived.restore(&records)?;
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

/// Error types and result aliases
pub mod error;
/// Baseline world library installed into every interpreter
pub mod globals;
/// Pseudo-heap handles and the named-object registry
pub mod heap;
/// Host boundary: clocks and host-resource back-slots
pub mod host;
/// The interpreter root and scheduler loop
pub mod interp;
/// Native-function table
pub mod natives;
/// Pseudo-object layout and property semantics
pub mod object;
/// Round-robin queues for cooperative fibers
pub mod scheduler;
/// Lexical scope chain and the hoisting pre-pass
pub mod scope;
/// World snapshot encoder and decoder
pub mod snapshot;
/// The step engine: suspendable per-node evaluation states
pub mod step;
/// Fiber representation
pub mod thread;
/// The value model and its coercions
pub mod value;
/// Iterable weak containers
pub mod weak;

pub use error::{DecodeError, EngineError, EngineResult};
pub use heap::{ObjRef, Registry, WeakObjRef};
pub use host::{Clock, ManualClock, MonotonicClock};
pub use interp::{Builtins, EngineLimits, Interpreter, RunState};
pub use natives::{NativeCall, NativeFn, NativeOutcome, NativeRegistry};
pub use object::{ClassTag, Property, PropertyAttrs, PsObject};
pub use scope::{ScopePolicy, ScopeRef};
pub use snapshot::SNAPSHOT_VERSION;
pub use step::{State, StateArena, StateIx};
pub use thread::{Abrupt, Blocker, Thread, ThreadId, ThreadStatus};
pub use value::{PrimitiveHint, Value};
pub use weak::{IterableWeakMap, IterableWeakSet};
