//! Control-flow states: loops, try/catch/finally, switch.
//!
//! These are the states that intercept abrupt completions. The dispatcher
//! has already checked that an intercepted completion belongs here (label
//! match, handler presence), so the handlers consume `pending` directly.

use burrow_ast::{NodeIx, NodeKind};

use crate::error::{EngineError, EngineResult};
use crate::object::{enumerate_keys, has_property};
use crate::scope::ScopeRef;
use crate::thread::Abrupt;
use crate::value::Value;

use super::lvalue::Lvalue;
use super::{Next, StepCx};

/// Try phases, consulted by the dispatcher's interception check.
pub(super) const TRY_START: u8 = 0;
pub(crate) const TRY_IN_BLOCK: u8 = 1;
pub(crate) const TRY_IN_CATCH: u8 = 2;
pub(super) const TRY_IN_FINALLY: u8 = 3;

pub(super) fn while_stmt(cx: &mut StepCx<'_>, test: NodeIx, body: NodeIx) -> EngineResult<Next> {
    match cx.take_pending()? {
        Some(Abrupt::Break(_)) => return cx.finish(),
        Some(Abrupt::Continue(_)) | None => {}
        Some(other) => {
            // Interception only admits break/continue here.
            cx.set_pending(other)?;
            return cx.propagate();
        }
    }
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(test)
        }
        _ => {
            if cx.pop_value()?.to_boolean() {
                cx.state_mut()?.phase = 0;
                cx.push_child(body)
            } else {
                cx.finish()
            }
        }
    }
}

pub(super) fn do_while(cx: &mut StepCx<'_>, body: NodeIx, test: NodeIx) -> EngineResult<Next> {
    match cx.take_pending()? {
        Some(Abrupt::Break(_)) => return cx.finish(),
        Some(Abrupt::Continue(_)) => {
            // Resume at the test.
            cx.state_mut()?.phase = 2;
            return cx.push_child(test);
        }
        None => {}
        Some(other) => {
            cx.set_pending(other)?;
            return cx.propagate();
        }
    }
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(body)
        }
        1 => {
            cx.state_mut()?.phase = 2;
            cx.push_child(test)
        }
        _ => {
            if cx.pop_value()?.to_boolean() {
                cx.state_mut()?.phase = 1;
                cx.push_child(body)
            } else {
                cx.finish()
            }
        }
    }
}

pub(super) fn for_stmt(
    cx: &mut StepCx<'_>,
    init: Option<NodeIx>,
    test: Option<NodeIx>,
    update: Option<NodeIx>,
    body: NodeIx,
) -> EngineResult<Next> {
    match cx.take_pending()? {
        Some(Abrupt::Break(_)) => return cx.finish(),
        Some(Abrupt::Continue(_)) => {
            let state = cx.state_mut()?;
            state.values.clear();
            match update {
                Some(update) => {
                    state.phase = 4;
                    return cx.push_child(update);
                }
                None => {
                    state.phase = 1;
                    return cx.stay();
                }
            }
        }
        None => {}
        Some(other) => {
            cx.set_pending(other)?;
            return cx.propagate();
        }
    }
    match cx.state()?.phase {
        0 => match init {
            Some(init) => {
                cx.state_mut()?.phase = 1;
                cx.push_child(init)
            }
            None => {
                cx.state_mut()?.phase = 1;
                cx.stay()
            }
        },
        1 => {
            let state = cx.state_mut()?;
            state.values.clear();
            match test {
                Some(test) => {
                    state.phase = 2;
                    cx.push_child(test)
                }
                None => {
                    state.phase = 3;
                    cx.push_child(body)
                }
            }
        }
        2 => {
            if cx.pop_value()?.to_boolean() {
                cx.state_mut()?.phase = 3;
                cx.push_child(body)
            } else {
                cx.finish()
            }
        }
        3 => match update {
            Some(update) => {
                cx.state_mut()?.phase = 4;
                cx.push_child(update)
            }
            None => {
                cx.state_mut()?.phase = 1;
                cx.stay()
            }
        },
        _ => {
            let state = cx.state_mut()?;
            state.values.clear();
            state.phase = 1;
            cx.stay()
        }
    }
}

pub(super) fn for_in(
    cx: &mut StepCx<'_>,
    left: NodeIx,
    right: NodeIx,
    body: NodeIx,
) -> EngineResult<Next> {
    match cx.take_pending()? {
        Some(Abrupt::Break(_)) => return cx.finish(),
        Some(Abrupt::Continue(_)) | None => {}
        Some(other) => {
            cx.set_pending(other)?;
            return cx.propagate();
        }
    }
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(right)
        }
        1 => {
            let value = cx.pop_value()?;
            match value {
                Value::Object(ref obj) => {
                    // The key list is fixed when iteration starts; keys
                    // deleted mid-loop are skipped at their turn.
                    let keys = enumerate_keys(obj);
                    let state = cx.state_mut()?;
                    state.keys = keys;
                    state.values = vec![value.clone()];
                    state.index = 0;
                    state.phase = 2;
                    cx.stay()
                }
                _ => cx.finish(),
            }
        }
        _ => {
            loop {
                let state = cx.state()?;
                let index = state.index as usize;
                if index >= state.keys.len() {
                    return cx.finish();
                }
                let key = state.keys[index].clone();
                let obj = match state.values.first() {
                    Some(Value::Object(obj)) => obj.clone(),
                    _ => return Err(EngineError::state_corrupt("for-in lost its object")),
                };
                cx.state_mut()?.index += 1;
                if !has_property(&obj, &key) {
                    continue;
                }
                let target = for_in_target(cx, left)?;
                if let Err(thrown) = target.set(cx.interp, Value::Str(key)) {
                    cx.set_pending(Abrupt::Throw(thrown))?;
                    return cx.propagate();
                }
                return cx.push_child(body);
            }
        }
    }
}

fn for_in_target(cx: &StepCx<'_>, left: NodeIx) -> EngineResult<Lvalue> {
    let scope = cx.scope()?;
    match cx.interp.ast().node(left).kind.clone() {
        NodeKind::Identifier { name } => Ok(Lvalue::ident(scope, name)),
        NodeKind::VariableDeclaration { declarations } => {
            let declarator = declarations
                .first()
                .copied()
                .ok_or_else(|| EngineError::invalid_program("empty for-in declaration"))?;
            match &cx.interp.ast().node(declarator).kind {
                NodeKind::VariableDeclarator { id, .. } => {
                    let name = cx.interp.identifier_name(*id)?;
                    // Hoisting declared the name; binding writes it in place.
                    Ok(Lvalue::ident(scope, name))
                }
                other => Err(EngineError::invalid_program(format!(
                    "for-in declarator is {}",
                    other.type_name()
                ))),
            }
        }
        other => Err(EngineError::unsupported(format!(
            "for-in target {}",
            other.type_name()
        ))),
    }
}

pub(super) fn try_stmt(
    cx: &mut StepCx<'_>,
    block: NodeIx,
    handler: Option<NodeIx>,
    finalizer: Option<NodeIx>,
) -> EngineResult<Next> {
    if let Some(abrupt) = cx.take_pending()? {
        let phase = cx.state()?.phase;
        if phase == TRY_IN_BLOCK && handler.is_some() {
            if let Abrupt::Throw(error) = abrupt {
                let handler = handler.expect("checked above");
                let (param, body) = match &cx.interp.ast().node(handler).kind {
                    NodeKind::CatchClause { param, body } => (*param, *body),
                    other => {
                        return Err(EngineError::invalid_program(format!(
                            "try handler is {}",
                            other.type_name()
                        )))
                    }
                };
                let name = cx.interp.identifier_name(param)?;
                let catch_scope = ScopeRef::new_child(&cx.scope()?, None);
                catch_scope.declare_set(name, error);
                cx.state_mut()?.phase = TRY_IN_CATCH;
                return cx.push_child_scoped(body, catch_scope);
            }
            // Not a throw: only a finalizer can have intercepted it.
            let finalizer = finalizer
                .ok_or_else(|| EngineError::state_corrupt("try intercepted without finalizer"))?;
            cx.state_mut()?.saved = Some(abrupt);
            cx.state_mut()?.phase = TRY_IN_FINALLY;
            return cx.push_child(finalizer);
        }
        let finalizer = finalizer
            .ok_or_else(|| EngineError::state_corrupt("try intercepted without finalizer"))?;
        cx.state_mut()?.saved = Some(abrupt);
        cx.state_mut()?.phase = TRY_IN_FINALLY;
        return cx.push_child(finalizer);
    }

    match cx.state()?.phase {
        TRY_START => {
            cx.state_mut()?.phase = TRY_IN_BLOCK;
            cx.push_child(block)
        }
        TRY_IN_BLOCK | TRY_IN_CATCH => match finalizer {
            Some(finalizer) => {
                cx.state_mut()?.phase = TRY_IN_FINALLY;
                cx.push_child(finalizer)
            }
            None => cx.finish(),
        },
        _ => {
            // Finally finished normally; replay whatever it postponed.
            match cx.state_mut()?.saved.take() {
                Some(abrupt) => {
                    cx.set_pending(abrupt)?;
                    cx.propagate()
                }
                None => cx.finish(),
            }
        }
    }
}

pub(super) fn switch_stmt(
    cx: &mut StepCx<'_>,
    discriminant: NodeIx,
    cases: Vec<NodeIx>,
) -> EngineResult<Next> {
    if let Some(abrupt) = cx.take_pending()? {
        match abrupt {
            Abrupt::Break(_) => return cx.finish(),
            other => {
                cx.set_pending(other)?;
                return cx.propagate();
            }
        }
    }
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(discriminant)
        }
        1 => {
            let discriminant_value = cx.pop_value()?;
            let state = cx.state_mut()?;
            state.values = vec![discriminant_value];
            state.index = 0;
            state.phase = 2;
            cx.stay()
        }
        2 => {
            // Scan for the matching case, remembering the default clause.
            loop {
                let index = cx.state()?.index as usize;
                if index >= cases.len() {
                    let default = cx.state()?.keys.first().and_then(|k| k.parse::<u32>().ok());
                    return match default {
                        Some(default_ix) => {
                            let state = cx.state_mut()?;
                            state.index = default_ix;
                            state.aux = 0;
                            state.phase = 4;
                            cx.stay()
                        }
                        None => cx.finish(),
                    };
                }
                match case_parts(cx, cases[index])?.0 {
                    Some(test) => {
                        cx.state_mut()?.phase = 3;
                        return cx.push_child(test);
                    }
                    None => {
                        let state = cx.state_mut()?;
                        if state.keys.is_empty() {
                            state.keys.push(index.to_string());
                        }
                        state.index += 1;
                    }
                }
            }
        }
        3 => {
            let test_value = cx.pop_value()?;
            let matched = cx
                .state()?
                .values
                .first()
                .is_some_and(|d| d.strict_equals(&test_value));
            let state = cx.state_mut()?;
            if matched {
                state.aux = 0;
                state.phase = 4;
            } else {
                state.index += 1;
                state.phase = 2;
            }
            cx.stay()
        }
        _ => {
            // Run consequents from the matched case onward (fallthrough).
            loop {
                let index = cx.state()?.index as usize;
                if index >= cases.len() {
                    return cx.finish();
                }
                let consequent = case_parts(cx, cases[index])?.1;
                let aux = cx.state()?.aux as usize;
                if aux < consequent.len() {
                    cx.state_mut()?.aux += 1;
                    return cx.push_child(consequent[aux]);
                }
                let state = cx.state_mut()?;
                state.index += 1;
                state.aux = 0;
            }
        }
    }
}

fn case_parts(cx: &StepCx<'_>, case: NodeIx) -> EngineResult<(Option<NodeIx>, Vec<NodeIx>)> {
    match &cx.interp.ast().node(case).kind {
        NodeKind::SwitchCase { test, consequent } => Ok((*test, consequent.clone())),
        other => Err(EngineError::invalid_program(format!(
            "switch case is {}",
            other.type_name()
        ))),
    }
}
