//! Native-function table.
//!
//! Every host-implemented callable is registered under a stable string id
//! before execution begins. Snapshots reference natives exclusively by id,
//! so restoring requires the same id set. The table is interpreter-scoped;
//! tests freely build several interpreters with different tables.

use indexmap::IndexMap;

use crate::error::{EngineError, EngineResult};
use crate::thread::{Blocker, ThreadId};
use crate::value::Value;

/// Host-implemented built-in callable.
pub type NativeFn = fn(&mut crate::interp::Interpreter, NativeCall) -> EngineResult<NativeOutcome>;

/// Arguments of one native invocation.
#[derive(Debug, Clone)]
pub struct NativeCall {
    /// Receiver of the call
    pub this: Value,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Thread issuing the call
    pub thread: ThreadId,
    /// True for `new`-expression invocations
    pub construct: bool,
}

impl NativeCall {
    /// Returns argument `i`, or `undefined` past the end.
    pub fn arg(&self, i: usize) -> Value {
        self.args.get(i).cloned().unwrap_or(Value::Undefined)
    }
}

/// Result of one native invocation.
#[derive(Debug)]
pub enum NativeOutcome {
    /// Normal completion
    Value(Value),
    /// User-level error to raise at the call site
    Throw(Value),
    /// Park the thread until the clock reaches `until_ms`; the pending
    /// call completes with `undefined` on wake
    Sleep { until_ms: u64 },
    /// Park the thread on `blocker`; the native is invoked again once the
    /// host reports readiness
    Block { blocker: Blocker },
}

/// Registry of native functions, keyed by stable id.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    entries: IndexMap<String, NativeFn>,
    sealed: bool,
}

impl NativeRegistry {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under `id`.
    ///
    /// Ids are unique and registration closes once the table is sealed;
    /// both violations are host bugs.
    pub fn register<S: Into<String>>(&mut self, id: S, func: NativeFn) -> EngineResult<()> {
        let id = id.into();
        if self.sealed {
            return Err(EngineError::NativeRegistration {
                id,
                reason: "table is sealed".to_string(),
            });
        }
        if self.entries.contains_key(&id) {
            return Err(EngineError::NativeRegistration {
                id,
                reason: "duplicate id".to_string(),
            });
        }
        self.entries.insert(id, func);
        Ok(())
    }

    /// Looks a native up by id.
    pub fn lookup(&self, id: &str) -> Option<NativeFn> {
        self.entries.get(id).copied()
    }

    /// Returns true when `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Reverse lookup: the id of a registered function.
    pub fn id_of(&self, func: NativeFn) -> Option<&str> {
        let target = func as usize;
        self.entries
            .iter()
            .find(|(_, f)| **f as usize == target)
            .map(|(id, _)| id.as_str())
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered natives.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes the table against further registration.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns true once the table is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;

    fn nop(_: &mut Interpreter, _: NativeCall) -> EngineResult<NativeOutcome> {
        Ok(NativeOutcome::Value(Value::Undefined))
    }

    fn other(_: &mut Interpreter, _: NativeCall) -> EngineResult<NativeOutcome> {
        Ok(NativeOutcome::Value(Value::Null))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = NativeRegistry::new();
        registry.register("world.nop", nop).expect("registers");
        assert!(registry.contains("world.nop"));
        assert!(registry.lookup("world.nop").is_some());
        assert_eq!(registry.id_of(nop), Some("world.nop"));
        assert_eq!(registry.id_of(other), None);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut registry = NativeRegistry::new();
        registry.register("f", nop).expect("first registration");
        let err = registry.register("f", other).unwrap_err();
        assert!(matches!(err, EngineError::NativeRegistration { .. }));
    }

    #[test]
    fn sealed_table_rejects_registration() {
        let mut registry = NativeRegistry::new();
        registry.seal();
        assert!(registry.register("late", nop).is_err());
    }

    #[test]
    fn ids_enumerate_in_registration_order() {
        let mut registry = NativeRegistry::new();
        registry.register("b", nop).unwrap();
        registry.register("a", other).unwrap();
        let ids: Vec<&str> = registry.ids().collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
