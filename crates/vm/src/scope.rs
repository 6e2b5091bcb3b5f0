//! Scope chain for the burrow interpreter.
//!
//! Scopes are shared cells: closures capture them, and the snapshot walk
//! visits them through the same handles the step engine uses. Variable maps
//! preserve declaration order so snapshots are deterministic.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use burrow_ast::{NodeIx, NodeKind};

use crate::error::{EngineError, EngineResult};
use crate::heap::PtrKey;
use crate::interp::Interpreter;
use crate::value::Value;

/// Policy for assigning to a name no scope declares.
///
/// The language default mirrors strict mode and throws a user
/// `ReferenceError`; hosts may select silent creation on the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePolicy {
    #[default]
    Throw,
    CreateOnGlobal,
}

/// One lexical environment.
#[derive(Debug)]
pub struct Scope {
    vars: IndexMap<String, Value>,
    parent: Option<ScopeRef>,
    this: Value,
}

impl Scope {
    /// Declaration-ordered variable iteration.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The enclosing scope, if any.
    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.clone()
    }

    /// The `this` binding of this scope.
    pub fn this_value(&self) -> Value {
        self.this.clone()
    }
}

/// Shared handle to a scope.
#[derive(Clone)]
pub struct ScopeRef(Rc<RefCell<Scope>>);

impl ScopeRef {
    /// Creates the outermost (global) scope.
    pub fn new_global(this: Value) -> Self {
        ScopeRef(Rc::new(RefCell::new(Scope {
            vars: IndexMap::new(),
            parent: None,
            this,
        })))
    }

    /// Creates a child scope; `this` defaults to the parent's binding.
    pub fn new_child(parent: &ScopeRef, this: Option<Value>) -> Self {
        let this = this.unwrap_or_else(|| parent.borrow().this_value());
        ScopeRef(Rc::new(RefCell::new(Scope {
            vars: IndexMap::new(),
            parent: Some(parent.clone()),
            this,
        })))
    }

    /// Borrows the scope immutably.
    pub fn borrow(&self) -> Ref<'_, Scope> {
        self.0.borrow()
    }

    /// Borrows the scope mutably.
    pub fn borrow_mut(&self) -> RefMut<'_, Scope> {
        self.0.borrow_mut()
    }

    /// Returns true when both handles address the same scope.
    pub fn ptr_eq(&self, other: &ScopeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the identity key of the scope.
    pub fn ptr_key(&self) -> PtrKey {
        // Scope and object keys never collide: they are distinct allocations.
        PtrKey::from_raw(Rc::as_ptr(&self.0) as usize)
    }

    /// Declares `name` with `undefined` unless it already exists here.
    pub fn declare(&self, name: &str) {
        let mut scope = self.0.borrow_mut();
        if !scope.vars.contains_key(name) {
            scope.vars.insert(name.to_string(), Value::Undefined);
        }
    }

    /// Declares `name` and binds it to `value` in this scope.
    pub fn declare_set<S: Into<String>>(&self, name: S, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    /// Reads `name`, walking outward; `None` when unresolved.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(v) = scope.vars.get(name) {
            return Some(v.clone());
        }
        let parent = scope.parent.clone();
        drop(scope);
        parent.and_then(|p| p.get(name))
    }

    /// Writes `name` in the nearest declaring scope; false when unresolved.
    pub fn set_existing(&self, name: &str, value: Value) -> bool {
        let mut scope = self.0.borrow_mut();
        if let Some(slot) = scope.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        let parent = scope.parent.clone();
        drop(scope);
        match parent {
            Some(p) => p.set_existing(name, value),
            None => false,
        }
    }

    /// Returns true when some scope on the chain declares `name`.
    pub fn has(&self, name: &str) -> bool {
        let scope = self.0.borrow();
        if scope.vars.contains_key(name) {
            return true;
        }
        let parent = scope.parent.clone();
        drop(scope);
        parent.is_some_and(|p| p.has(name))
    }

    /// The `this` binding visible from this scope.
    pub fn this_value(&self) -> Value {
        self.0.borrow().this_value()
    }

    /// Rebinds `this` (decode internals).
    pub(crate) fn set_this(&self, this: Value) {
        self.0.borrow_mut().this = this;
    }

    /// Rebinds the parent link (decode internals).
    pub(crate) fn set_parent(&self, parent: Option<ScopeRef>) {
        self.0.borrow_mut().parent = parent;
    }
}

impl PartialEq for ScopeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ScopeRef {}

impl Hash for ScopeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr_key().hash(state);
    }
}

impl fmt::Debug for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(scope) => write!(f, "ScopeRef({} vars)", scope.vars.len()),
            Err(_) => write!(f, "ScopeRef(<borrowed>)"),
        }
    }
}

/// Hoisting pre-pass over one function body or program.
///
/// Declares every `var` name as `undefined` and binds every function
/// declaration to its closure, descending statements but never nested
/// function bodies. Running the pass twice is harmless: existing `var`
/// bindings are left alone and re-created closures are equivalent.
pub fn populate_scope(interp: &Interpreter, node: NodeIx, scope: &ScopeRef) -> EngineResult<()> {
    let kind = interp
        .ast()
        .get(node)
        .ok_or_else(|| EngineError::invalid_program(format!("node {} out of range", node.0)))?
        .kind
        .clone();

    match kind {
        NodeKind::Program { body } | NodeKind::BlockStatement { body } => {
            for stmt in body {
                populate_scope(interp, stmt, scope)?;
            }
        }
        NodeKind::VariableDeclaration { declarations } => {
            for decl in declarations {
                if let NodeKind::VariableDeclarator { id, .. } = &interp.ast().node(decl).kind {
                    scope.declare(&interp.identifier_name(*id)?);
                }
            }
        }
        NodeKind::FunctionDeclaration { id, params, body } => {
            let name = interp.identifier_name(id)?;
            let params = interp.param_names(&params)?;
            let func = interp.new_declared_function(params, body, scope.clone(), Some(name.clone()));
            scope.declare_set(name, Value::Object(func));
        }
        NodeKind::IfStatement {
            consequent,
            alternate,
            ..
        } => {
            populate_scope(interp, consequent, scope)?;
            if let Some(alt) = alternate {
                populate_scope(interp, alt, scope)?;
            }
        }
        NodeKind::WhileStatement { body, .. } | NodeKind::DoWhileStatement { body, .. } => {
            populate_scope(interp, body, scope)?;
        }
        NodeKind::ForStatement { init, body, .. } => {
            if let Some(init) = init {
                populate_scope_if_declaration(interp, init, scope)?;
            }
            populate_scope(interp, body, scope)?;
        }
        NodeKind::ForInStatement { left, body, .. } => {
            populate_scope_if_declaration(interp, left, scope)?;
            populate_scope(interp, body, scope)?;
        }
        NodeKind::TryStatement {
            block,
            handler,
            finalizer,
        } => {
            populate_scope(interp, block, scope)?;
            if let Some(handler) = handler {
                if let NodeKind::CatchClause { body, .. } = &interp.ast().node(handler).kind {
                    populate_scope(interp, *body, scope)?;
                }
            }
            if let Some(finalizer) = finalizer {
                populate_scope(interp, finalizer, scope)?;
            }
        }
        NodeKind::SwitchStatement { cases, .. } => {
            for case in cases {
                if let NodeKind::SwitchCase { consequent, .. } = &interp.ast().node(case).kind {
                    for stmt in consequent.clone() {
                        populate_scope(interp, stmt, scope)?;
                    }
                }
            }
        }
        NodeKind::LabeledStatement { body, .. } => {
            populate_scope(interp, body, scope)?;
        }
        // Expressions, nested function bodies, and leaf statements
        // contribute no hoisted names.
        _ => {}
    }
    Ok(())
}

fn populate_scope_if_declaration(
    interp: &Interpreter,
    node: NodeIx,
    scope: &ScopeRef,
) -> EngineResult<()> {
    if matches!(
        &interp.ast().node(node).kind,
        NodeKind::VariableDeclaration { .. }
    ) {
        populate_scope(interp, node, scope)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_walk_outward() {
        let global = ScopeRef::new_global(Value::Undefined);
        global.declare_set("x", Value::Number(1.0));
        let inner = ScopeRef::new_child(&global, None);

        assert_eq!(inner.get("x").map(|v| v.to_number()), Some(1.0));
        assert!(inner.set_existing("x", Value::Number(2.0)));
        assert_eq!(global.get("x").map(|v| v.to_number()), Some(2.0));
        assert!(!inner.set_existing("missing", Value::Null));
        assert!(inner.get("missing").is_none());
    }

    #[test]
    fn shadowing_declares_locally() {
        let global = ScopeRef::new_global(Value::Undefined);
        global.declare_set("x", Value::Number(1.0));
        let inner = ScopeRef::new_child(&global, None);
        inner.declare("x");

        assert_eq!(inner.get("x").map(|v| v.type_of()), Some("undefined"));
        assert_eq!(global.get("x").map(|v| v.to_number()), Some(1.0));
    }

    #[test]
    fn declare_is_idempotent() {
        let scope = ScopeRef::new_global(Value::Undefined);
        scope.declare_set("x", Value::Number(5.0));
        scope.declare("x");
        assert_eq!(scope.get("x").map(|v| v.to_number()), Some(5.0));
    }

    #[test]
    fn this_binding_inherits() {
        let global = ScopeRef::new_global(Value::Str("world".into()));
        let child = ScopeRef::new_child(&global, None);
        let rebound = ScopeRef::new_child(&global, Some(Value::Number(7.0)));
        assert_eq!(child.this_value().to_js_string(), "world");
        assert_eq!(rebound.this_value().to_number(), 7.0);
    }
}
