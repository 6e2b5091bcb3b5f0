//! World snapshots.
//!
//! A snapshot is an ordered array of JSON records; record 0 is the
//! interpreter root and carries the format version. References between
//! records are `{"#": index}`. Encoding walks the live graph with
//! first-visit numbering; decoding is the standard two-pass
//! stub-then-populate rehydration into a pre-initialized interpreter.

mod decode;
mod encode;
mod record;

pub(crate) use decode::RestoredWorld;

use serde_json::Value as Json;

use crate::error::{DecodeError, EngineResult};
use crate::interp::Interpreter;

/// Current snapshot format version, written into record 0.
pub const SNAPSHOT_VERSION: u64 = 1;

/// Serializes the whole interpreter to a record array.
pub(crate) fn encode(interp: &Interpreter) -> EngineResult<Vec<Json>> {
    encode::encode(interp)
}

/// Rehydrates `interp` from a record array; all-or-nothing.
pub(crate) fn restore(interp: &mut Interpreter, records: &[Json]) -> Result<(), DecodeError> {
    let world = decode::decode_world(interp, records)?;
    interp.install_world(world);
    Ok(())
}
