//! Assignment targets.
//!
//! An [`Lvalue`] is a resolved reference: either a scope variable or a
//! base-plus-key member slot. Member targets become ready only after the
//! enclosing expression has evaluated the base (and a computed key); the
//! expression handlers keep those pieces in their captured values and build
//! the helper on demand.

use crate::interp::Interpreter;
use crate::object;
use crate::scope::{ScopePolicy, ScopeRef};
use crate::value::Value;

/// A resolved assignment target.
#[derive(Debug)]
pub(crate) enum Lvalue {
    Ident { scope: ScopeRef, name: String },
    Member { base: Value, key: String },
}

impl Lvalue {
    /// Variable target.
    pub fn ident(scope: ScopeRef, name: String) -> Self {
        Lvalue::Ident { scope, name }
    }

    /// Member target (base already evaluated, key already computed).
    pub fn member(base: Value, key: String) -> Self {
        Lvalue::Member { base, key }
    }

    /// Reads the target. `Err` carries a user error value.
    pub fn get(&self, interp: &Interpreter) -> Result<Value, Value> {
        match self {
            Lvalue::Ident { scope, name } => scope.get(name).ok_or_else(|| {
                interp.new_error_value("ReferenceError", &format!("{name} is not defined"))
            }),
            Lvalue::Member { base, key } => member_get(interp, base, key),
        }
    }

    /// Writes the target. `Err` carries a user error value.
    pub fn set(&self, interp: &Interpreter, value: Value) -> Result<(), Value> {
        match self {
            Lvalue::Ident { scope, name } => {
                if scope.set_existing(name, value.clone()) {
                    return Ok(());
                }
                match interp.scope_policy() {
                    ScopePolicy::Throw => Err(interp
                        .new_error_value("ReferenceError", &format!("{name} is not defined"))),
                    ScopePolicy::CreateOnGlobal => {
                        interp.global_scope().declare_set(name.clone(), value);
                        Ok(())
                    }
                }
            }
            Lvalue::Member { base, key } => member_set(interp, base, key, value),
        }
    }
}

/// Property read with receiver coercion.
pub(crate) fn member_get(interp: &Interpreter, base: &Value, key: &str) -> Result<Value, Value> {
    match base {
        Value::Undefined | Value::Null => Err(interp.new_error_value(
            "TypeError",
            &format!("Cannot read property '{key}' of {}", base.to_js_string()),
        )),
        Value::Object(obj) => Ok(object::get_property(obj, key).unwrap_or(Value::Undefined)),
        Value::Str(s) => {
            if key == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            if let Some(index) = object::array_index(key) {
                return Ok(s
                    .chars()
                    .nth(index as usize)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            Ok(proto_lookup(&interp.builtins().string_proto, key))
        }
        Value::Number(_) => Ok(proto_lookup(&interp.builtins().number_proto, key)),
        Value::Bool(_) => Ok(proto_lookup(&interp.builtins().boolean_proto, key)),
    }
}

/// Primitive receivers answer through their wrapper prototype.
fn proto_lookup(proto: &crate::heap::ObjRef, key: &str) -> Value {
    object::get_property(proto, key).unwrap_or(Value::Undefined)
}

/// Property write with receiver coercion.
///
/// Writes to primitives and to non-writable slots fail silently, matching
/// non-strict assignment.
pub(crate) fn member_set(
    interp: &Interpreter,
    base: &Value,
    key: &str,
    value: Value,
) -> Result<(), Value> {
    match base {
        Value::Undefined | Value::Null => Err(interp.new_error_value(
            "TypeError",
            &format!("Cannot set property '{key}' of {}", base.to_js_string()),
        )),
        Value::Object(obj) => {
            obj.borrow_mut().set_prop(key, value);
            Ok(())
        }
        _ => Ok(()),
    }
}
