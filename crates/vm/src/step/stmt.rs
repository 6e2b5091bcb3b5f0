//! Statement states: programs, blocks, declarations, and the abrupt-raising
//! statements.

use burrow_ast::{NodeIx, NodeKind};

use crate::error::EngineResult;
use crate::scope::populate_scope;
use crate::thread::Abrupt;
use crate::value::Value;

use super::{Next, StepCx};

pub(super) fn program(cx: &mut StepCx<'_>, body: Vec<NodeIx>) -> EngineResult<Next> {
    let state = cx.state()?;
    if state.phase == 0 {
        let node = state.node;
        let scope = state.scope.clone();
        populate_scope(cx.interp, node, &scope)?;
        cx.state_mut()?.phase = 1;
    }
    let index = cx.state()?.index as usize;
    if index < body.len() {
        cx.state_mut()?.index += 1;
        cx.push_child(body[index])
    } else {
        cx.finish()
    }
}

pub(super) fn block(cx: &mut StepCx<'_>, body: Vec<NodeIx>) -> EngineResult<Next> {
    let index = cx.state()?.index as usize;
    if index < body.len() {
        cx.state_mut()?.index += 1;
        cx.push_child(body[index])
    } else {
        cx.finish()
    }
}

pub(super) fn expression_stmt(cx: &mut StepCx<'_>, expression: NodeIx) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        cx.state_mut()?.phase = 1;
        return cx.push_child(expression);
    }
    let value = cx.pop_value()?;
    cx.interp.thread_mut(cx.tid)?.result = value;
    cx.finish()
}

pub(super) fn var_decl(cx: &mut StepCx<'_>, declarations: Vec<NodeIx>) -> EngineResult<Next> {
    let index = cx.state()?.index as usize;
    if index < declarations.len() {
        cx.state_mut()?.index += 1;
        cx.push_child(declarations[index])
    } else {
        cx.finish()
    }
}

pub(super) fn var_declarator(
    cx: &mut StepCx<'_>,
    id: NodeIx,
    init: Option<NodeIx>,
) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        match init {
            Some(init) => {
                cx.state_mut()?.phase = 1;
                return cx.push_child(init);
            }
            // The hoisting pass already declared the name.
            None => return cx.finish(),
        }
    }
    let value = cx.pop_value()?;
    let name = cx.interp.identifier_name(id)?;
    let scope = cx.scope()?;
    if !scope.set_existing(&name, value.clone()) {
        scope.declare_set(name, value);
    }
    cx.finish()
}

pub(super) fn if_stmt(
    cx: &mut StepCx<'_>,
    test: NodeIx,
    consequent: NodeIx,
    alternate: Option<NodeIx>,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(test)
        }
        1 => {
            let taken = cx.pop_value()?.to_boolean();
            cx.state_mut()?.phase = 2;
            if taken {
                cx.push_child(consequent)
            } else if let Some(alternate) = alternate {
                cx.push_child(alternate)
            } else {
                cx.finish()
            }
        }
        _ => cx.finish(),
    }
}

pub(super) fn labeled(cx: &mut StepCx<'_>, label: String, body: NodeIx) -> EngineResult<Next> {
    // A matching labeled break was intercepted by the dispatcher.
    let pending_break = matches!(
        &cx.interp.thread(cx.tid)?.pending,
        Some(Abrupt::Break(_))
    );
    if pending_break {
        cx.take_pending()?;
        return cx.finish();
    }
    if cx.state()?.phase == 0 {
        cx.state_mut()?.phase = 1;
        cx.state_mut()?.label = Some(label.clone());
        let next = cx.push_child(body)?;
        if let Some(child) = next {
            let loops = matches!(
                &cx.interp.ast().node(body).kind,
                NodeKind::WhileStatement { .. }
                    | NodeKind::DoWhileStatement { .. }
                    | NodeKind::ForStatement { .. }
                    | NodeKind::ForInStatement { .. }
            );
            if loops {
                cx.interp.states_mut().get_mut(child)?.label = Some(label);
            }
        }
        return Ok(next);
    }
    cx.finish()
}

pub(super) fn return_stmt(cx: &mut StepCx<'_>, argument: Option<NodeIx>) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        if let Some(argument) = argument {
            cx.state_mut()?.phase = 1;
            return cx.push_child(argument);
        }
        cx.set_pending(Abrupt::Return(Value::Undefined))?;
        return cx.propagate();
    }
    let value = cx.pop_value()?;
    cx.set_pending(Abrupt::Return(value))?;
    cx.propagate()
}

pub(super) fn throw_stmt(cx: &mut StepCx<'_>, argument: NodeIx) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        cx.state_mut()?.phase = 1;
        return cx.push_child(argument);
    }
    let value = cx.pop_value()?;
    cx.set_pending(Abrupt::Throw(value))?;
    cx.propagate()
}

pub(super) fn break_stmt(cx: &mut StepCx<'_>, label: Option<String>) -> EngineResult<Next> {
    cx.set_pending(Abrupt::Break(label))?;
    cx.propagate()
}

pub(super) fn continue_stmt(cx: &mut StepCx<'_>, label: Option<String>) -> EngineResult<Next> {
    cx.set_pending(Abrupt::Continue(label))?;
    cx.propagate()
}
