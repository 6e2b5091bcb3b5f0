//! Call states: function expressions, calls, and `new`.
//!
//! A call state owns the whole sequence: callee (with receiver capture for
//! member callees), arguments left to right, then the invocation itself.
//! Captured values hold `[this, callee, arg0, arg1, …]` from phase
//! [`CALL_ARGS`] on, and stay in place while a native call is parked on a
//! timer or a blocker.

use burrow_ast::{NodeIx, NodeKind};

use crate::error::{EngineError, EngineResult};
use crate::natives::{NativeCall, NativeOutcome};
use crate::object::{self, ClassTag, FunctionSlots, InternalSlots};
use crate::scope::{populate_scope, ScopeRef};
use crate::thread::{Abrupt, ThreadStatus};
use crate::value::Value;

use super::lvalue::member_get;
use super::{Next, StepCx};

const CALL_MEMBER_BASE: u8 = 1;
const CALL_MEMBER_KEY: u8 = 2;
const CALL_PLAIN_CALLEE: u8 = 3;
const CALL_ARGS: u8 = 4;
pub(crate) const CALL_IN_BODY: u8 = 5;
const CALL_SLEPT: u8 = 6;
const CALL_BLOCKED: u8 = 7;

pub(super) fn function_expression(
    cx: &mut StepCx<'_>,
    id: Option<NodeIx>,
    params: Vec<NodeIx>,
    body: NodeIx,
) -> EngineResult<Next> {
    let name = match id {
        Some(id) => Some(cx.interp.identifier_name(id)?),
        None => None,
    };
    let params = cx.interp.param_names(&params)?;
    let scope = cx.scope()?;
    let func = cx.interp.new_declared_function(params, body, scope, name);
    cx.finish_value(Value::Object(func))
}

pub(super) fn call_expr(
    cx: &mut StepCx<'_>,
    callee: NodeIx,
    arguments: Vec<NodeIx>,
    construct: bool,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            // A member callee is split open so the base becomes `this`;
            // `new` rebinds `this` anyway and takes the plain path.
            if !construct {
                if let NodeKind::MemberExpression { object, .. } =
                    &cx.interp.ast().node(callee).kind
                {
                    let object = *object;
                    cx.state_mut()?.phase = CALL_MEMBER_BASE;
                    return cx.push_child(object);
                }
            }
            cx.state_mut()?.phase = CALL_PLAIN_CALLEE;
            cx.push_child(callee)
        }
        CALL_MEMBER_BASE => {
            let (property, computed) = match &cx.interp.ast().node(callee).kind {
                NodeKind::MemberExpression {
                    property, computed, ..
                } => (*property, *computed),
                _ => return Err(EngineError::state_corrupt("call lost its member callee")),
            };
            if computed {
                cx.state_mut()?.phase = CALL_MEMBER_KEY;
                return cx.push_child(property);
            }
            let key = cx.interp.identifier_name(property)?;
            resolve_member_callee(cx, &key)
        }
        CALL_MEMBER_KEY => {
            let key = cx.pop_value()?.to_js_string();
            resolve_member_callee(cx, &key)
        }
        CALL_PLAIN_CALLEE => {
            let func = cx.pop_value()?;
            let state = cx.state_mut()?;
            state.values = vec![Value::Undefined, func];
            state.index = 0;
            state.phase = CALL_ARGS;
            cx.stay()
        }
        CALL_ARGS => {
            let index = cx.state()?.index as usize;
            if index < arguments.len() {
                cx.state_mut()?.index += 1;
                return cx.push_child(arguments[index]);
            }
            invoke(cx, construct)
        }
        CALL_IN_BODY => {
            let result = match cx.take_pending()? {
                Some(Abrupt::Return(v)) => v,
                None => Value::Undefined,
                Some(other) => {
                    cx.set_pending(other)?;
                    return cx.propagate();
                }
            };
            let thread = cx.interp.thread_mut(cx.tid)?;
            thread.call_depth = thread.call_depth.saturating_sub(1);
            finish_call(cx, construct, result)
        }
        CALL_SLEPT => finish_call(cx, construct, Value::Undefined),
        CALL_BLOCKED => invoke(cx, construct),
        other => Err(EngineError::state_corrupt(format!(
            "call state in phase {other}"
        ))),
    }
}

fn resolve_member_callee(cx: &mut StepCx<'_>, key: &str) -> EngineResult<Next> {
    let base = cx.pop_value()?;
    let func = match member_get(cx.interp, &base, key) {
        Ok(func) => func,
        Err(thrown) => {
            cx.set_pending(Abrupt::Throw(thrown))?;
            return cx.propagate();
        }
    };
    let state = cx.state_mut()?;
    state.values = vec![base, func];
    state.index = 0;
    state.phase = CALL_ARGS;
    cx.stay()
}

/// Invokes the callee with the captured receiver and arguments.
fn invoke(cx: &mut StepCx<'_>, construct: bool) -> EngineResult<Next> {
    let (this, callee, args) = {
        let values = &cx.state()?.values;
        if values.len() < 2 {
            return Err(EngineError::state_corrupt("call lost its callee"));
        }
        (
            values[0].clone(),
            values[1].clone(),
            values[2..].to_vec(),
        )
    };

    let Some(func) = callee.as_object().cloned() else {
        return cx.throw_user(
            "TypeError",
            &format!("{} is not a function", callee.to_js_string()),
        );
    };
    if func.borrow().class() != ClassTag::Function {
        return cx.throw_user(
            "TypeError",
            &format!("{} is not a function", callee.to_js_string()),
        );
    }

    // `new f()`: allocate the instance before entering the constructor.
    let this = if construct && cx.state()?.phase == CALL_ARGS {
        let proto = match object::get_property(&func, "prototype") {
            Some(Value::Object(proto)) => Some(proto),
            _ => Some(cx.interp.builtins().object_proto.clone()),
        };
        let instance = cx.interp.new_object_with_proto(proto);
        cx.state_mut()?.values[0] = Value::Object(instance.clone());
        Value::Object(instance)
    } else if construct {
        // Re-invocation after a blocker: the instance already exists.
        this
    } else {
        this
    };

    enum Callee {
        Native(String),
        Declared {
            params: Vec<String>,
            body: NodeIx,
            scope: ScopeRef,
        },
    }

    let callee = match func.borrow().slots() {
        InternalSlots::Function(FunctionSlots::Native { id }) => Callee::Native(id.clone()),
        InternalSlots::Function(FunctionSlots::Declared {
            params,
            body,
            scope,
            ..
        }) => Callee::Declared {
            params: params.clone(),
            body: *body,
            scope: scope.clone(),
        },
        _ => {
            return cx.throw_user("TypeError", "Function object has no callable slot");
        }
    };

    match callee {
        Callee::Native(id) => {
            let native = cx
                .interp
                .natives()
                .lookup(&id)
                .ok_or(EngineError::UnknownNative { id })?;
            let call = NativeCall {
                this,
                args,
                thread: cx.tid,
                construct,
            };
            let outcome = native(cx.interp, call)?;
            apply_native_outcome(cx, outcome, construct)
        }
        Callee::Declared {
            params,
            body,
            scope,
        } => {
            let limit = cx.interp.limits().max_call_depth;
            let depth = cx.interp.thread(cx.tid)?.call_depth;
            if depth as usize + 1 > limit {
                return cx.throw_user("RangeError", "Maximum call stack size exceeded");
            }

            let this = match this {
                // Unbound calls see the global object, as the language's
                // non-strict evaluation does.
                Value::Undefined | Value::Null => {
                    Value::Object(cx.interp.builtins().global.clone())
                }
                bound => bound,
            };
            let fscope = ScopeRef::new_child(&scope, Some(this));
            for (i, param) in params.iter().enumerate() {
                fscope.declare_set(param.clone(), args.get(i).cloned().unwrap_or_default());
            }
            let arguments_obj = cx.interp.new_arguments(&args);
            fscope.declare_set("arguments", Value::Object(arguments_obj));
            populate_scope(cx.interp, body, &fscope)?;

            cx.interp.thread_mut(cx.tid)?.call_depth += 1;
            cx.state_mut()?.phase = CALL_IN_BODY;
            cx.push_child_scoped(body, fscope)
        }
    }
}

fn apply_native_outcome(
    cx: &mut StepCx<'_>,
    outcome: NativeOutcome,
    construct: bool,
) -> EngineResult<Next> {
    match outcome {
        NativeOutcome::Value(v) => finish_call(cx, construct, v),
        NativeOutcome::Throw(error) => {
            cx.set_pending(Abrupt::Throw(error))?;
            cx.propagate()
        }
        NativeOutcome::Sleep { until_ms } => {
            let thread = cx.interp.thread_mut(cx.tid)?;
            thread.status = ThreadStatus::Sleeping;
            thread.wake_at = Some(until_ms);
            cx.state_mut()?.phase = CALL_SLEPT;
            cx.stay()
        }
        NativeOutcome::Block { blocker } => {
            let thread = cx.interp.thread_mut(cx.tid)?;
            thread.status = ThreadStatus::Blocked;
            thread.blocker = Some(blocker);
            cx.state_mut()?.phase = CALL_BLOCKED;
            cx.stay()
        }
    }
}

fn finish_call(cx: &mut StepCx<'_>, construct: bool, result: Value) -> EngineResult<Next> {
    let result = if construct && !matches!(result, Value::Object(_)) {
        // A constructor returning a primitive yields the instance.
        cx.state()?
            .values
            .first()
            .cloned()
            .unwrap_or(Value::Undefined)
    } else {
        result
    };
    cx.finish_value(result)
}
