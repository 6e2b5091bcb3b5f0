//! Step engine.
//!
//! Every suspended computation is an explicit tree of [`State`] records in
//! an arena; one step advances the innermost state of one thread and returns
//! the next state to run. A state that spawned a child is resumed when the
//! child delivers its result through the value-acceptor protocol
//! ([`State::values`]); abrupt completions ride on the thread and unwind
//! state by state until something intercepts them.
//!
//! Dispatch is keyed on the AST node kind, split across submodules the way
//! instruction dispatch is usually grouped.

mod call;
mod control;
mod expr;
mod lvalue;
mod stmt;

use burrow_ast::{NodeIx, NodeKind};

use crate::error::{EngineError, EngineResult};
use crate::scope::ScopeRef;
use crate::thread::{Abrupt, ThreadId, ThreadStatus};
use crate::value::Value;

/// Index of a state inside the interpreter's state arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateIx(pub u32);

/// One vertex of a thread's continuation tree.
///
/// Progress fields are uniform; their meaning is fixed per AST node kind by
/// the handler that steps the state. Everything here serializes into a
/// snapshot record.
#[derive(Debug)]
pub struct State {
    /// AST node this state evaluates
    pub node: NodeIx,
    /// Enclosing state; `None` for a thread root
    pub parent: Option<StateIx>,
    /// Scope the node evaluates in
    pub scope: ScopeRef,
    /// Sub-step of the node's evaluation
    pub phase: u8,
    /// Primary counter (statement index, argument index, case index)
    pub index: u32,
    /// Secondary counter (fallthrough position, pending element slot)
    pub aux: u32,
    /// Captured sub-expression results, oldest first
    pub values: Vec<Value>,
    /// Captured key queue (`for (k in o)`) or stashed key strings
    pub keys: Vec<String>,
    /// Loop label attached by an enclosing labeled statement
    pub label: Option<String>,
    /// Completion stashed while a `finally` block runs
    pub saved: Option<Abrupt>,
}

impl State {
    /// Creates the initial state for evaluating `node` in `scope`.
    pub fn new(node: NodeIx, parent: Option<StateIx>, scope: ScopeRef) -> Self {
        Self {
            node,
            parent,
            scope,
            phase: 0,
            index: 0,
            aux: 0,
            values: Vec::new(),
            keys: Vec::new(),
            label: None,
            saved: None,
        }
    }
}

/// Arena of live states with slot reuse.
#[derive(Debug, Default)]
pub struct StateArena {
    slots: Vec<Option<State>>,
    free: Vec<u32>,
}

impl StateArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a state and returns its index.
    pub fn alloc(&mut self, state: State) -> StateIx {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(state);
                StateIx(slot)
            }
            None => {
                self.slots.push(Some(state));
                StateIx(self.slots.len() as u32 - 1)
            }
        }
    }

    /// Returns the state at `ix`.
    pub fn get(&self, ix: StateIx) -> EngineResult<&State> {
        self.slots
            .get(ix.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| EngineError::state_corrupt(format!("state {} is not live", ix.0)))
    }

    /// Returns the state at `ix` mutably.
    pub fn get_mut(&mut self, ix: StateIx) -> EngineResult<&mut State> {
        self.slots
            .get_mut(ix.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| EngineError::state_corrupt(format!("state {} is not live", ix.0)))
    }

    /// Frees the state at `ix`.
    pub fn free(&mut self, ix: StateIx) {
        if let Some(slot) = self.slots.get_mut(ix.0 as usize) {
            if slot.take().is_some() {
                self.free.push(ix.0);
            }
        }
    }

    /// Number of live states.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Live states with their indices.
    pub fn iter_live(&self) -> impl Iterator<Item = (StateIx, &State)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (StateIx(i as u32), s)))
    }

    /// Drops every state.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

/// Handler context for one step of one state.
pub(crate) struct StepCx<'a> {
    pub interp: &'a mut crate::interp::Interpreter,
    pub tid: ThreadId,
    pub six: StateIx,
}

/// What the thread runs next.
pub(crate) type Next = Option<StateIx>;

impl StepCx<'_> {
    pub fn state(&self) -> EngineResult<&State> {
        self.interp.states().get(self.six)
    }

    pub fn state_mut(&mut self) -> EngineResult<&mut State> {
        self.interp.states_mut().get_mut(self.six)
    }

    pub fn scope(&self) -> EngineResult<ScopeRef> {
        Ok(self.state()?.scope.clone())
    }

    /// Takes the pending abrupt completion off the thread.
    pub fn take_pending(&mut self) -> EngineResult<Option<Abrupt>> {
        Ok(self.interp.thread_mut(self.tid)?.pending.take())
    }

    /// Sets the pending abrupt completion.
    pub fn set_pending(&mut self, abrupt: Abrupt) -> EngineResult<()> {
        self.interp.thread_mut(self.tid)?.pending = Some(abrupt);
        Ok(())
    }

    /// Pops the most recent captured value.
    pub fn pop_value(&mut self) -> EngineResult<Value> {
        Ok(self.state_mut()?.values.pop().unwrap_or(Value::Undefined))
    }

    /// Spawns a child state for `node` in the current scope.
    pub fn push_child(&mut self, node: NodeIx) -> EngineResult<Next> {
        let scope = self.scope()?;
        self.push_child_scoped(node, scope)
    }

    /// Spawns a child state for `node` in an explicit scope.
    pub fn push_child_scoped(&mut self, node: NodeIx, scope: ScopeRef) -> EngineResult<Next> {
        let child = State::new(node, Some(self.six), scope);
        let ix = self.interp.alloc_state(child)?;
        Ok(Some(ix))
    }

    /// Finishes this state, delivering `value` to the parent.
    pub fn finish_value(&mut self, value: Value) -> EngineResult<Next> {
        let parent = self.state()?.parent;
        self.interp.states_mut().free(self.six);
        match parent {
            Some(p) => {
                self.interp.states_mut().get_mut(p)?.values.push(value);
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    /// Finishes this state without delivering a value (statement contexts).
    pub fn finish(&mut self) -> EngineResult<Next> {
        let parent = self.state()?.parent;
        self.interp.states_mut().free(self.six);
        Ok(parent)
    }

    /// Finishes this state leaving the thread's pending completion in place.
    pub fn propagate(&mut self) -> EngineResult<Next> {
        self.finish()
    }

    /// Raises a user error of the given class and propagates it.
    pub fn throw_user(&mut self, class: &str, message: &str) -> EngineResult<Next> {
        let err = self.interp.new_error_value(class, message);
        self.set_pending(Abrupt::Throw(err))?;
        self.propagate()
    }

    /// Continues with the same state (bookkeeping-only step).
    pub fn stay(&self) -> EngineResult<Next> {
        Ok(Some(self.six))
    }
}

/// Advances thread `tid` by exactly one step.
///
/// A step is indivisible: the scheduler never checkpoints inside one.
pub(crate) fn step_once(
    interp: &mut crate::interp::Interpreter,
    tid: ThreadId,
) -> EngineResult<()> {
    let six = interp
        .thread(tid)?
        .current
        .ok_or_else(|| EngineError::state_corrupt("stepping a finished thread"))?;
    let node = interp.states().get(six)?.node;
    let kind = interp
        .ast()
        .get(node)
        .ok_or_else(|| EngineError::invalid_program(format!("node {} out of range", node.0)))?
        .kind
        .clone();

    // Propagate an abrupt completion past every state that does not
    // intercept it.
    if let Some(abrupt) = interp.thread(tid)?.pending.clone() {
        let state = interp.states().get(six)?;
        if !intercepts(&kind, &abrupt, state) {
            return unwind(interp, tid, six, &kind);
        }
    }

    let mut cx = StepCx {
        interp: &mut *interp,
        tid,
        six,
    };
    let next = dispatch(&mut cx, kind)?;
    interp.thread_mut(tid)?.current = next;
    if next.is_none() {
        finalize_thread(interp, tid)?;
    }
    Ok(())
}

fn dispatch(cx: &mut StepCx<'_>, kind: NodeKind) -> EngineResult<Next> {
    match kind {
        NodeKind::Program { body } => stmt::program(cx, body),
        NodeKind::BlockStatement { body } => stmt::block(cx, body),
        NodeKind::EmptyStatement => cx.finish(),
        NodeKind::ExpressionStatement { expression } => stmt::expression_stmt(cx, expression),
        NodeKind::VariableDeclaration { declarations } => stmt::var_decl(cx, declarations),
        NodeKind::VariableDeclarator { id, init } => stmt::var_declarator(cx, id, init),
        NodeKind::FunctionDeclaration { .. } => cx.finish(),
        NodeKind::IfStatement {
            test,
            consequent,
            alternate,
        } => stmt::if_stmt(cx, test, consequent, alternate),
        NodeKind::LabeledStatement { label, body } => stmt::labeled(cx, label, body),
        NodeKind::ReturnStatement { argument } => stmt::return_stmt(cx, argument),
        NodeKind::ThrowStatement { argument } => stmt::throw_stmt(cx, argument),
        NodeKind::BreakStatement { label } => stmt::break_stmt(cx, label),
        NodeKind::ContinueStatement { label } => stmt::continue_stmt(cx, label),
        NodeKind::WhileStatement { test, body } => control::while_stmt(cx, test, body),
        NodeKind::DoWhileStatement { body, test } => control::do_while(cx, body, test),
        NodeKind::ForStatement {
            init,
            test,
            update,
            body,
        } => control::for_stmt(cx, init, test, update, body),
        NodeKind::ForInStatement { left, right, body } => control::for_in(cx, left, right, body),
        NodeKind::TryStatement {
            block,
            handler,
            finalizer,
        } => control::try_stmt(cx, block, handler, finalizer),
        NodeKind::SwitchStatement {
            discriminant,
            cases,
        } => control::switch_stmt(cx, discriminant, cases),
        NodeKind::Identifier { name } => expr::identifier(cx, &name),
        NodeKind::Literal { value } => expr::literal(cx, value),
        NodeKind::ThisExpression => {
            let this = cx.scope()?.this_value();
            cx.finish_value(this)
        }
        NodeKind::ObjectExpression { properties } => expr::object_expr(cx, properties),
        NodeKind::ArrayExpression { elements } => expr::array_expr(cx, elements),
        NodeKind::MemberExpression {
            object,
            property,
            computed,
        } => expr::member_expr(cx, object, property, computed),
        NodeKind::BinaryExpression {
            operator,
            left,
            right,
        } => expr::binary(cx, operator, left, right),
        NodeKind::LogicalExpression {
            operator,
            left,
            right,
        } => expr::logical(cx, operator, left, right),
        NodeKind::UnaryExpression { operator, argument } => expr::unary(cx, operator, argument),
        NodeKind::UpdateExpression {
            operator,
            prefix,
            argument,
        } => expr::update(cx, operator, prefix, argument),
        NodeKind::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => expr::conditional(cx, test, consequent, alternate),
        NodeKind::SequenceExpression { expressions } => expr::sequence(cx, expressions),
        NodeKind::AssignmentExpression {
            operator,
            left,
            right,
        } => expr::assignment(cx, operator, left, right),
        NodeKind::FunctionExpression { id, params, body } => {
            call::function_expression(cx, id, params, body)
        }
        NodeKind::CallExpression { callee, arguments } => {
            call::call_expr(cx, callee, arguments, false)
        }
        NodeKind::NewExpression { callee, arguments } => {
            call::call_expr(cx, callee, arguments, true)
        }
        NodeKind::Property { .. } | NodeKind::CatchClause { .. } | NodeKind::SwitchCase { .. } => {
            Err(EngineError::state_corrupt(format!(
                "{} never evaluates as its own state",
                kind.type_name()
            )))
        }
    }
}

/// Does a state of `kind` intercept `abrupt` in its current shape?
fn intercepts(kind: &NodeKind, abrupt: &Abrupt, state: &State) -> bool {
    match kind {
        NodeKind::WhileStatement { .. }
        | NodeKind::DoWhileStatement { .. }
        | NodeKind::ForStatement { .. }
        | NodeKind::ForInStatement { .. } => match abrupt {
            Abrupt::Break(label) | Abrupt::Continue(label) => {
                label.is_none() || label.as_deref() == state.label.as_deref()
            }
            _ => false,
        },
        NodeKind::SwitchStatement { .. } => matches!(
            abrupt,
            Abrupt::Break(None)
        ) || matches!(abrupt, Abrupt::Break(Some(l)) if Some(l.as_str()) == state.label.as_deref()),
        NodeKind::LabeledStatement { label, .. } => {
            matches!(abrupt, Abrupt::Break(Some(l)) if l == label)
        }
        NodeKind::TryStatement {
            handler, finalizer, ..
        } => match state.phase {
            control::TRY_IN_BLOCK => match abrupt {
                Abrupt::Throw(_) => handler.is_some() || finalizer.is_some(),
                _ => finalizer.is_some(),
            },
            control::TRY_IN_CATCH => finalizer.is_some(),
            _ => false,
        },
        NodeKind::CallExpression { .. } | NodeKind::NewExpression { .. } => {
            state.phase == call::CALL_IN_BODY && matches!(abrupt, Abrupt::Return(_))
        }
        _ => false,
    }
}

/// Pops `six` without delivering a value, leaving the pending completion to
/// be examined by the parent on the next step.
fn unwind(
    interp: &mut crate::interp::Interpreter,
    tid: ThreadId,
    six: StateIx,
    kind: &NodeKind,
) -> EngineResult<()> {
    if matches!(
        kind,
        NodeKind::CallExpression { .. } | NodeKind::NewExpression { .. }
    ) && interp.states().get(six)?.phase == call::CALL_IN_BODY
    {
        let thread = interp.thread_mut(tid)?;
        thread.call_depth = thread.call_depth.saturating_sub(1);
    }
    let parent = interp.states().get(six)?.parent;
    interp.states_mut().free(six);
    interp.thread_mut(tid)?.current = parent;
    if parent.is_none() {
        finalize_thread(interp, tid)?;
    }
    Ok(())
}

/// Marks a thread whose continuation is exhausted as done, folding any
/// pending completion into its result or uncaught-error slot.
fn finalize_thread(interp: &mut crate::interp::Interpreter, tid: ThreadId) -> EngineResult<()> {
    let thread = interp.thread_mut(tid)?;
    thread.current = None;
    thread.status = ThreadStatus::Done;
    match thread.pending.take() {
        Some(Abrupt::Return(v)) => thread.result = v,
        Some(Abrupt::Throw(v)) => {
            thread.uncaught = Some(v.clone());
            log::warn!(
                "thread {} terminated by uncaught error: {}",
                thread.id.0,
                v.to_js_string()
            );
        }
        Some(Abrupt::Break(_)) | Some(Abrupt::Continue(_)) => {
            log::warn!("thread {} finished with a dangling loop completion", thread.id.0);
        }
        None => {}
    }
    Ok(())
}

/// Frees an entire parent chain starting at `six` (thread kill).
pub(crate) fn free_chain(arena: &mut StateArena, six: StateIx) {
    let mut cursor = Some(six);
    while let Some(ix) = cursor {
        cursor = arena.get(ix).ok().and_then(|s| s.parent);
        arena.free(ix);
    }
}
