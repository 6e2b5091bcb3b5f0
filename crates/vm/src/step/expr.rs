//! Expression states.
//!
//! Evaluation order is left before right, base before key, strictly as the
//! language defines it; every handler delivers exactly one value to its
//! parent when it finishes.

use burrow_ast::{AssignOp, BinaryOp, LitValue, LogicalOp, NodeIx, NodeKind, UnaryOp, UpdateOp};

use crate::error::{EngineError, EngineResult};
use crate::interp::Interpreter;
use crate::object::{self, ClassTag};
use crate::thread::Abrupt;
use crate::value::{to_int32, to_uint32, PrimitiveHint, Value};

use super::lvalue::{member_get, Lvalue};
use super::{Next, StepCx};

pub(super) fn identifier(cx: &mut StepCx<'_>, name: &str) -> EngineResult<Next> {
    match cx.scope()?.get(name) {
        Some(value) => cx.finish_value(value),
        None => cx.throw_user("ReferenceError", &format!("{name} is not defined")),
    }
}

pub(super) fn literal(cx: &mut StepCx<'_>, value: LitValue) -> EngineResult<Next> {
    let value = match value {
        LitValue::Null => Value::Null,
        LitValue::Bool(b) => Value::Bool(b),
        LitValue::Num(n) => Value::Number(n),
        LitValue::Str(s) => Value::Str(s),
        LitValue::Regex { pattern, flags } => {
            Value::Object(cx.interp.new_regexp(&pattern, &flags))
        }
    };
    cx.finish_value(value)
}

pub(super) fn object_expr(cx: &mut StepCx<'_>, properties: Vec<NodeIx>) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        let obj = cx.interp.new_object();
        let state = cx.state_mut()?;
        state.values.push(Value::Object(obj));
        state.phase = 1;
        return cx.stay();
    }
    if cx.state()?.values.len() == 2 {
        let value = cx.pop_value()?;
        let index = cx.state()?.index as usize;
        let key = property_key(cx.interp, properties[index - 1])?;
        if let Some(Value::Object(obj)) = cx.state()?.values.first() {
            obj.borrow_mut().set_prop(&key, value);
        }
    }
    let index = cx.state()?.index as usize;
    if index < properties.len() {
        let value_node = property_value(cx.interp, properties[index])?;
        cx.state_mut()?.index += 1;
        cx.push_child(value_node)
    } else {
        let obj = cx.pop_value()?;
        cx.finish_value(obj)
    }
}

fn property_key(interp: &Interpreter, prop: NodeIx) -> EngineResult<String> {
    match &interp.ast().node(prop).kind {
        NodeKind::Property { key, .. } => Ok(key.clone()),
        other => Err(EngineError::invalid_program(format!(
            "object property is {}",
            other.type_name()
        ))),
    }
}

fn property_value(interp: &Interpreter, prop: NodeIx) -> EngineResult<NodeIx> {
    match &interp.ast().node(prop).kind {
        NodeKind::Property { value, .. } => Ok(*value),
        other => Err(EngineError::invalid_program(format!(
            "object property is {}",
            other.type_name()
        ))),
    }
}

pub(super) fn array_expr(
    cx: &mut StepCx<'_>,
    elements: Vec<Option<NodeIx>>,
) -> EngineResult<Next> {
    if cx.state()?.phase == 0 {
        let arr = cx.interp.new_array();
        let state = cx.state_mut()?;
        state.values.push(Value::Object(arr));
        state.phase = 1;
        return cx.stay();
    }
    if cx.state()?.values.len() == 2 {
        let value = cx.pop_value()?;
        let slot = cx.state()?.aux;
        if let Some(Value::Object(arr)) = cx.state()?.values.first() {
            arr.borrow_mut().set_prop(&slot.to_string(), value);
        }
    }
    // Holes advance the length without evaluating anything.
    loop {
        let index = cx.state()?.index as usize;
        if index >= elements.len() {
            let arr = cx.pop_value()?;
            return cx.finish_value(arr);
        }
        match elements[index] {
            Some(element) => {
                let state = cx.state_mut()?;
                state.aux = index as u32;
                state.index += 1;
                return cx.push_child(element);
            }
            None => {
                if let Some(Value::Object(arr)) = cx.state()?.values.first() {
                    let arr = arr.clone();
                    let mut borrowed = arr.borrow_mut();
                    if object::array_length(&borrowed) < index as u32 + 1 {
                        borrowed.set_prop("length", Value::Number(index as f64 + 1.0));
                    }
                }
                cx.state_mut()?.index += 1;
            }
        }
    }
}

pub(super) fn member_expr(
    cx: &mut StepCx<'_>,
    object: NodeIx,
    property: NodeIx,
    computed: bool,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(object)
        }
        1 => {
            if computed {
                cx.state_mut()?.phase = 2;
                return cx.push_child(property);
            }
            let key = cx.interp.identifier_name(property)?;
            member_finish(cx, &key)
        }
        _ => {
            let key = cx.pop_value()?.to_js_string();
            member_finish(cx, &key)
        }
    }
}

fn member_finish(cx: &mut StepCx<'_>, key: &str) -> EngineResult<Next> {
    let base = cx.pop_value()?;
    match member_get(cx.interp, &base, key) {
        Ok(value) => cx.finish_value(value),
        Err(thrown) => {
            cx.set_pending(Abrupt::Throw(thrown))?;
            cx.propagate()
        }
    }
}

pub(super) fn binary(
    cx: &mut StepCx<'_>,
    op: BinaryOp,
    left: NodeIx,
    right: NodeIx,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(left)
        }
        1 => {
            cx.state_mut()?.phase = 2;
            cx.push_child(right)
        }
        _ => {
            let r = cx.pop_value()?;
            let l = cx.pop_value()?;
            match apply_binary(cx.interp, op, &l, &r) {
                Ok(value) => cx.finish_value(value),
                Err(thrown) => {
                    cx.set_pending(Abrupt::Throw(thrown))?;
                    cx.propagate()
                }
            }
        }
    }
}

pub(super) fn logical(
    cx: &mut StepCx<'_>,
    op: LogicalOp,
    left: NodeIx,
    right: NodeIx,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(left)
        }
        1 => {
            let l = cx.pop_value()?;
            let short_circuits = match op {
                LogicalOp::And => !l.to_boolean(),
                LogicalOp::Or => l.to_boolean(),
            };
            if short_circuits {
                return cx.finish_value(l);
            }
            cx.state_mut()?.phase = 2;
            cx.push_child(right)
        }
        _ => {
            let r = cx.pop_value()?;
            cx.finish_value(r)
        }
    }
}

pub(super) fn unary(cx: &mut StepCx<'_>, op: UnaryOp, argument: NodeIx) -> EngineResult<Next> {
    let argument_kind = cx.interp.ast().node(argument).kind.clone();

    // `typeof missing` reads the scope directly and never throws.
    if op == UnaryOp::Typeof {
        if let NodeKind::Identifier { name } = &argument_kind {
            let text = match cx.scope()?.get(name) {
                Some(value) => value.type_of(),
                None => "undefined",
            };
            return cx.finish_value(Value::Str(text.to_string()));
        }
    }

    if op == UnaryOp::Delete {
        return delete(cx, &argument_kind);
    }

    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(argument)
        }
        _ => {
            let v = cx.pop_value()?;
            let result = match op {
                UnaryOp::Minus => Value::Number(-v.to_number()),
                UnaryOp::Plus => Value::Number(v.to_number()),
                UnaryOp::Not => Value::Bool(!v.to_boolean()),
                UnaryOp::BitNot => Value::Number(f64::from(!to_int32(v.to_number()))),
                UnaryOp::Typeof => Value::Str(v.type_of().to_string()),
                UnaryOp::Void => Value::Undefined,
                UnaryOp::Delete => unreachable!("handled above"),
            };
            cx.finish_value(result)
        }
    }
}

fn delete(cx: &mut StepCx<'_>, argument_kind: &NodeKind) -> EngineResult<Next> {
    let (object, property, computed) = match argument_kind {
        NodeKind::MemberExpression {
            object,
            property,
            computed,
        } => (*object, *property, *computed),
        // Variables cannot be deleted; any other operand deletes nothing.
        other => {
            let result = !matches!(other, NodeKind::Identifier { .. });
            return cx.finish_value(Value::Bool(result));
        }
    };
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(object)
        }
        1 => {
            if computed {
                cx.state_mut()?.phase = 2;
                return cx.push_child(property);
            }
            let key = cx.interp.identifier_name(property)?;
            delete_finish(cx, &key)
        }
        _ => {
            let key = cx.pop_value()?.to_js_string();
            delete_finish(cx, &key)
        }
    }
}

fn delete_finish(cx: &mut StepCx<'_>, key: &str) -> EngineResult<Next> {
    let base = cx.pop_value()?;
    let result = match base {
        Value::Object(obj) => obj.borrow_mut().delete_prop(key),
        _ => true,
    };
    cx.finish_value(Value::Bool(result))
}

pub(super) fn update(
    cx: &mut StepCx<'_>,
    op: UpdateOp,
    prefix: bool,
    argument: NodeIx,
) -> EngineResult<Next> {
    let argument_kind = cx.interp.ast().node(argument).kind.clone();
    match argument_kind {
        NodeKind::Identifier { name } => {
            let target = Lvalue::ident(cx.scope()?, name);
            update_finish(cx, &target, op, prefix)
        }
        NodeKind::MemberExpression {
            object,
            property,
            computed,
        } => match cx.state()?.phase {
            0 => {
                cx.state_mut()?.phase = 1;
                cx.push_child(object)
            }
            1 => {
                if computed {
                    cx.state_mut()?.phase = 2;
                    return cx.push_child(property);
                }
                let key = cx.interp.identifier_name(property)?;
                let base = cx.pop_value()?;
                let target = Lvalue::member(base, key);
                update_finish(cx, &target, op, prefix)
            }
            _ => {
                let key = cx.pop_value()?.to_js_string();
                let base = cx.pop_value()?;
                let target = Lvalue::member(base, key);
                update_finish(cx, &target, op, prefix)
            }
        },
        other => Err(EngineError::invalid_program(format!(
            "update target {}",
            other.type_name()
        ))),
    }
}

fn update_finish(
    cx: &mut StepCx<'_>,
    target: &Lvalue,
    op: UpdateOp,
    prefix: bool,
) -> EngineResult<Next> {
    let old = match target.get(cx.interp) {
        Ok(v) => v.to_number(),
        Err(thrown) => {
            cx.set_pending(Abrupt::Throw(thrown))?;
            return cx.propagate();
        }
    };
    let new = match op {
        UpdateOp::Inc => old + 1.0,
        UpdateOp::Dec => old - 1.0,
    };
    if let Err(thrown) = target.set(cx.interp, Value::Number(new)) {
        cx.set_pending(Abrupt::Throw(thrown))?;
        return cx.propagate();
    }
    cx.finish_value(Value::Number(if prefix { new } else { old }))
}

pub(super) fn conditional(
    cx: &mut StepCx<'_>,
    test: NodeIx,
    consequent: NodeIx,
    alternate: NodeIx,
) -> EngineResult<Next> {
    match cx.state()?.phase {
        0 => {
            cx.state_mut()?.phase = 1;
            cx.push_child(test)
        }
        1 => {
            let taken = cx.pop_value()?.to_boolean();
            cx.state_mut()?.phase = 2;
            cx.push_child(if taken { consequent } else { alternate })
        }
        _ => {
            let v = cx.pop_value()?;
            cx.finish_value(v)
        }
    }
}

pub(super) fn sequence(cx: &mut StepCx<'_>, expressions: Vec<NodeIx>) -> EngineResult<Next> {
    let index = cx.state()?.index as usize;
    if index < expressions.len() {
        let state = cx.state_mut()?;
        state.values.clear();
        state.index += 1;
        cx.push_child(expressions[index])
    } else {
        let v = cx.pop_value()?;
        cx.finish_value(v)
    }
}

pub(super) fn assignment(
    cx: &mut StepCx<'_>,
    op: AssignOp,
    left: NodeIx,
    right: NodeIx,
) -> EngineResult<Next> {
    let left_kind = cx.interp.ast().node(left).kind.clone();
    match left_kind {
        NodeKind::Identifier { name } => match cx.state()?.phase {
            0 => {
                if op.binary_op().is_some() {
                    let target = Lvalue::ident(cx.scope()?, name);
                    match target.get(cx.interp) {
                        Ok(old) => cx.state_mut()?.values.push(old),
                        Err(thrown) => {
                            cx.set_pending(Abrupt::Throw(thrown))?;
                            return cx.propagate();
                        }
                    }
                }
                cx.state_mut()?.phase = 3;
                cx.push_child(right)
            }
            _ => {
                let target = Lvalue::ident(cx.scope()?, name);
                assignment_finish(cx, op, target)
            }
        },
        NodeKind::MemberExpression {
            object,
            property,
            computed,
        } => match cx.state()?.phase {
            0 => {
                cx.state_mut()?.phase = 1;
                cx.push_child(object)
            }
            1 => {
                if computed {
                    cx.state_mut()?.phase = 2;
                    return cx.push_child(property);
                }
                let key = cx.interp.identifier_name(property)?;
                assignment_prepare_rhs(cx, op, key, right)
            }
            2 => {
                let key = cx.pop_value()?.to_js_string();
                assignment_prepare_rhs(cx, op, key, right)
            }
            _ => {
                let key = cx.state()?.keys.first().cloned().ok_or_else(|| {
                    EngineError::state_corrupt("member assignment lost its key")
                })?;
                let base = cx.state()?.values.first().cloned().ok_or_else(|| {
                    EngineError::state_corrupt("member assignment lost its base")
                })?;
                let target = Lvalue::member(base, key);
                assignment_finish(cx, op, target)
            }
        },
        other => Err(EngineError::invalid_program(format!(
            "assignment target {}",
            other.type_name()
        ))),
    }
}

/// Captures the old value for compound member assignment, then evaluates
/// the right-hand side. `values` holds `[base]` or `[base, old]`.
fn assignment_prepare_rhs(
    cx: &mut StepCx<'_>,
    op: AssignOp,
    key: String,
    right: NodeIx,
) -> EngineResult<Next> {
    cx.state_mut()?.keys = vec![key.clone()];
    if op.binary_op().is_some() {
        let base = cx
            .state()?
            .values
            .first()
            .cloned()
            .ok_or_else(|| EngineError::state_corrupt("member assignment lost its base"))?;
        match member_get(cx.interp, &base, &key) {
            Ok(old) => cx.state_mut()?.values.push(old),
            Err(thrown) => {
                cx.set_pending(Abrupt::Throw(thrown))?;
                return cx.propagate();
            }
        }
    }
    cx.state_mut()?.phase = 3;
    cx.push_child(right)
}

fn assignment_finish(cx: &mut StepCx<'_>, op: AssignOp, target: Lvalue) -> EngineResult<Next> {
    let rhs = cx.pop_value()?;
    let result = match op.binary_op() {
        Some(binop) => {
            let old = cx.pop_value()?;
            match apply_binary(cx.interp, binop, &old, &rhs) {
                Ok(v) => v,
                Err(thrown) => {
                    cx.set_pending(Abrupt::Throw(thrown))?;
                    return cx.propagate();
                }
            }
        }
        None => rhs,
    };
    if let Err(thrown) = target.set(cx.interp, result.clone()) {
        cx.set_pending(Abrupt::Throw(thrown))?;
        return cx.propagate();
    }
    cx.finish_value(result)
}

/// Applies a binary operator. `Err` carries a user error value.
pub(crate) fn apply_binary(
    interp: &Interpreter,
    op: BinaryOp,
    l: &Value,
    r: &Value,
) -> Result<Value, Value> {
    Ok(match op {
        BinaryOp::Add => {
            let lp = l.to_primitive(PrimitiveHint::Default);
            let rp = r.to_primitive(PrimitiveHint::Default);
            if matches!(lp, Value::Str(_)) || matches!(rp, Value::Str(_)) {
                Value::Str(format!("{}{}", lp.to_js_string(), rp.to_js_string()))
            } else {
                Value::Number(lp.to_number() + rp.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(l.to_number() - r.to_number()),
        BinaryOp::Mul => Value::Number(l.to_number() * r.to_number()),
        BinaryOp::Div => Value::Number(l.to_number() / r.to_number()),
        BinaryOp::Mod => Value::Number(l.to_number() % r.to_number()),
        BinaryOp::Eq => Value::Bool(l.loose_equals(r)),
        BinaryOp::Ne => Value::Bool(!l.loose_equals(r)),
        BinaryOp::StrictEq => Value::Bool(l.strict_equals(r)),
        BinaryOp::StrictNe => Value::Bool(!l.strict_equals(r)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let lp = l.to_primitive(PrimitiveHint::Number);
            let rp = r.to_primitive(PrimitiveHint::Number);
            if let (Value::Str(ls), Value::Str(rs)) = (&lp, &rp) {
                Value::Bool(match op {
                    BinaryOp::Lt => ls < rs,
                    BinaryOp::Gt => ls > rs,
                    BinaryOp::Le => ls <= rs,
                    _ => ls >= rs,
                })
            } else {
                let ln = lp.to_number();
                let rn = rp.to_number();
                if ln.is_nan() || rn.is_nan() {
                    Value::Bool(false)
                } else {
                    Value::Bool(match op {
                        BinaryOp::Lt => ln < rn,
                        BinaryOp::Gt => ln > rn,
                        BinaryOp::Le => ln <= rn,
                        _ => ln >= rn,
                    })
                }
            }
        }
        BinaryOp::BitAnd => Value::Number(f64::from(to_int32(l.to_number()) & to_int32(r.to_number()))),
        BinaryOp::BitOr => Value::Number(f64::from(to_int32(l.to_number()) | to_int32(r.to_number()))),
        BinaryOp::BitXor => Value::Number(f64::from(to_int32(l.to_number()) ^ to_int32(r.to_number()))),
        BinaryOp::Shl => Value::Number(f64::from(
            to_int32(l.to_number()) << (to_uint32(r.to_number()) & 31),
        )),
        BinaryOp::Shr => Value::Number(f64::from(
            to_int32(l.to_number()) >> (to_uint32(r.to_number()) & 31),
        )),
        BinaryOp::UShr => Value::Number(f64::from(
            to_uint32(l.to_number()) >> (to_uint32(r.to_number()) & 31),
        )),
        BinaryOp::In => match r {
            Value::Object(obj) => Value::Bool(object::has_property(obj, &l.to_js_string())),
            _ => {
                return Err(interp.new_error_value(
                    "TypeError",
                    "Cannot use 'in' operator on a non-object",
                ))
            }
        },
        BinaryOp::Instanceof => {
            let Some(func) = r.as_object() else {
                return Err(
                    interp.new_error_value("TypeError", "Right-hand side of 'instanceof' is not callable")
                );
            };
            if func.borrow().class() != ClassTag::Function {
                return Err(
                    interp.new_error_value("TypeError", "Right-hand side of 'instanceof' is not callable")
                );
            }
            let proto = object::get_property(func, "prototype");
            let Some(Value::Object(proto)) = proto else {
                return Err(interp.new_error_value(
                    "TypeError",
                    "Function has non-object prototype in 'instanceof'",
                ));
            };
            match l {
                Value::Object(obj) => Value::Bool(object::proto_chain_contains(obj, &proto)),
                _ => Value::Bool(false),
            }
        }
    })
}
