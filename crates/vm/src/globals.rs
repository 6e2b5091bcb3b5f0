//! Baseline world library.
//!
//! Registers the standard natives and wires the global scope: constructors,
//! prototype methods, `Math`, and the thread built-ins. Hosts register
//! their own natives on top before the first spawn seals the table.

use crate::error::EngineResult;
use crate::interp::{Interpreter, ERROR_CLASSES};
use crate::natives::{NativeCall, NativeOutcome};
use crate::object::{
    self, ClassTag, InternalSlots, Property, PsObject, PropertyAttrs,
};
use crate::heap::ObjRef;
use crate::thread::ThreadId;
use crate::value::{js_string_to_number, Value};
use crate::weak::{IterableWeakMap, IterableWeakSet};

/// Registers the baseline natives and binds the global environment.
pub(crate) fn install(interp: &mut Interpreter) -> EngineResult<()> {
    register_natives(interp)?;
    bind_globals(interp)?;
    Ok(())
}

fn register_natives(interp: &mut Interpreter) -> EngineResult<()> {
    let natives = interp.natives_mut();
    let entries: &[(&str, crate::natives::NativeFn)] = &[
        ("print", print),
        ("String", string_ctor),
        ("Number", number_ctor),
        ("Boolean", boolean_ctor),
        ("isNaN", is_nan),
        ("isFinite", is_finite),
        ("parseInt", parse_int),
        ("parseFloat", parse_float),
        ("Object", object_ctor),
        ("Object.keys", object_keys),
        ("Object.getPrototypeOf", object_get_prototype_of),
        ("Object.create", object_create),
        ("Object.defineProperty", object_define_property),
        ("Object.preventExtensions", object_prevent_extensions),
        ("Object.isExtensible", object_is_extensible),
        ("Object.getOwnPropertyNames", object_get_own_property_names),
        ("Object.prototype.toString", object_proto_to_string),
        ("Object.prototype.hasOwnProperty", object_has_own_property),
        ("Array", array_ctor),
        ("Array.prototype.push", array_push),
        ("Array.prototype.pop", array_pop),
        ("Array.prototype.join", array_join),
        ("Array.prototype.indexOf", array_index_of),
        ("Math.floor", math_floor),
        ("Math.ceil", math_ceil),
        ("Math.round", math_round),
        ("Math.abs", math_abs),
        ("Math.sqrt", math_sqrt),
        ("Math.pow", math_pow),
        ("Math.max", math_max),
        ("Math.min", math_min),
        ("Date", date_ctor),
        ("Date.now", date_now),
        ("Date.prototype.getTime", date_get_time),
        ("Date.prototype.toISOString", date_to_iso_string),
        ("RegExp", regexp_ctor),
        ("RegExp.prototype.toString", regexp_to_string),
        ("Error", error_ctor),
        ("TypeError", type_error_ctor),
        ("RangeError", range_error_ctor),
        ("ReferenceError", reference_error_ctor),
        ("SyntaxError", syntax_error_ctor),
        ("URIError", uri_error_ctor),
        ("EvalError", eval_error_ctor),
        ("PermissionError", permission_error_ctor),
        ("Error.prototype.toString", error_to_string),
        ("Map", map_ctor),
        ("Map.prototype.get", map_get),
        ("Map.prototype.set", map_set),
        ("Map.prototype.has", map_has),
        ("Map.prototype.delete", map_delete),
        ("Map.prototype.size", map_size),
        ("Set", set_ctor),
        ("Set.prototype.add", set_add),
        ("Set.prototype.has", set_has),
        ("Set.prototype.delete", set_delete),
        ("Set.prototype.size", set_size),
        ("WeakMap", weakmap_ctor),
        ("WeakMap.prototype.get", weakmap_get),
        ("WeakMap.prototype.set", weakmap_set),
        ("WeakMap.prototype.has", weakmap_has),
        ("WeakMap.prototype.delete", weakmap_delete),
        ("WeakMap.prototype.size", weakmap_size),
        ("WeakSet", weakset_ctor),
        ("WeakSet.prototype.add", weakset_add),
        ("WeakSet.prototype.has", weakset_has),
        ("WeakSet.prototype.delete", weakset_delete),
        ("WeakSet.prototype.size", weakset_size),
        ("WeakSet.prototype.values", weakset_values),
        ("spawn", spawn_thread),
        ("kill", kill_thread),
        ("sleep", sleep_thread),
        ("suspend", suspend_thread),
        ("currentThread", current_thread),
        ("clock", clock_ms),
        ("Thread.prototype.id", thread_handle_id),
    ];
    for (id, func) in entries {
        natives.register(*id, *func)?;
    }
    Ok(())
}

fn bind_globals(interp: &mut Interpreter) -> EngineResult<()> {
    let scope = interp.global_scope().clone();

    scope.declare_set("undefined", Value::Undefined);
    scope.declare_set("NaN", Value::Number(f64::NAN));
    scope.declare_set("Infinity", Value::Number(f64::INFINITY));

    for name in [
        "print",
        "isNaN",
        "isFinite",
        "parseInt",
        "parseFloat",
        "spawn",
        "kill",
        "sleep",
        "suspend",
        "currentThread",
        "clock",
    ] {
        let func = interp.new_native_function(name)?;
        scope.declare_set(name, Value::Object(func));
    }

    let object_proto = interp.builtins().object_proto.clone();
    constructor(interp, "Object", "Object", &object_proto)?;
    method(interp, &object_proto, "toString", "Object.prototype.toString")?;
    method(
        interp,
        &object_proto,
        "hasOwnProperty",
        "Object.prototype.hasOwnProperty",
    )?;

    let object_ctor_obj = scope.get("Object").and_then(|v| v.as_object().cloned());
    if let Some(ctor) = object_ctor_obj {
        for (name, id) in [
            ("keys", "Object.keys"),
            ("getPrototypeOf", "Object.getPrototypeOf"),
            ("create", "Object.create"),
            ("defineProperty", "Object.defineProperty"),
            ("preventExtensions", "Object.preventExtensions"),
            ("isExtensible", "Object.isExtensible"),
            ("getOwnPropertyNames", "Object.getOwnPropertyNames"),
        ] {
            method(interp, &ctor, name, id)?;
        }
    }

    let string_proto = interp.builtins().string_proto.clone();
    constructor(interp, "String", "String", &string_proto)?;
    let number_proto = interp.builtins().number_proto.clone();
    constructor(interp, "Number", "Number", &number_proto)?;
    let boolean_proto = interp.builtins().boolean_proto.clone();
    constructor(interp, "Boolean", "Boolean", &boolean_proto)?;

    let array_proto = interp.builtins().array_proto.clone();
    constructor(interp, "Array", "Array", &array_proto)?;
    for (name, id) in [
        ("push", "Array.prototype.push"),
        ("pop", "Array.prototype.pop"),
        ("join", "Array.prototype.join"),
        ("indexOf", "Array.prototype.indexOf"),
    ] {
        method(interp, &array_proto, name, id)?;
    }

    let date_proto = interp.builtins().date_proto.clone();
    let date_ctor_obj = constructor(interp, "Date", "Date", &date_proto)?;
    method(interp, &date_ctor_obj, "now", "Date.now")?;
    method(interp, &date_proto, "getTime", "Date.prototype.getTime")?;
    method(
        interp,
        &date_proto,
        "toISOString",
        "Date.prototype.toISOString",
    )?;

    let regexp_proto = interp.builtins().regexp_proto.clone();
    constructor(interp, "RegExp", "RegExp", &regexp_proto)?;
    method(interp, &regexp_proto, "toString", "RegExp.prototype.toString")?;

    for name in ERROR_CLASSES {
        let proto = interp
            .builtins()
            .error_protos
            .get(name)
            .cloned()
            .unwrap_or_else(|| interp.builtins().error_proto.clone());
        {
            let mut borrowed = proto.borrow_mut();
            borrowed.install_prop("name", Property::hidden(Value::string(name)));
            borrowed.install_prop("message", Property::hidden(Value::string("")));
        }
        constructor(interp, name, name, &proto)?;
    }
    let error_proto = interp.builtins().error_proto.clone();
    method(interp, &error_proto, "toString", "Error.prototype.toString")?;

    let map_proto = interp.builtins().map_proto.clone();
    constructor(interp, "Map", "Map", &map_proto)?;
    for (name, id) in [
        ("get", "Map.prototype.get"),
        ("set", "Map.prototype.set"),
        ("has", "Map.prototype.has"),
        ("delete", "Map.prototype.delete"),
        ("size", "Map.prototype.size"),
    ] {
        method(interp, &map_proto, name, id)?;
    }

    let set_proto = interp.builtins().set_proto.clone();
    constructor(interp, "Set", "Set", &set_proto)?;
    for (name, id) in [
        ("add", "Set.prototype.add"),
        ("has", "Set.prototype.has"),
        ("delete", "Set.prototype.delete"),
        ("size", "Set.prototype.size"),
    ] {
        method(interp, &set_proto, name, id)?;
    }

    let weakmap_proto = interp.builtins().weakmap_proto.clone();
    constructor(interp, "WeakMap", "WeakMap", &weakmap_proto)?;
    for (name, id) in [
        ("get", "WeakMap.prototype.get"),
        ("set", "WeakMap.prototype.set"),
        ("has", "WeakMap.prototype.has"),
        ("delete", "WeakMap.prototype.delete"),
        ("size", "WeakMap.prototype.size"),
    ] {
        method(interp, &weakmap_proto, name, id)?;
    }

    let weakset_proto = interp.builtins().weakset_proto.clone();
    constructor(interp, "WeakSet", "WeakSet", &weakset_proto)?;
    for (name, id) in [
        ("add", "WeakSet.prototype.add"),
        ("has", "WeakSet.prototype.has"),
        ("delete", "WeakSet.prototype.delete"),
        ("size", "WeakSet.prototype.size"),
        ("values", "WeakSet.prototype.values"),
    ] {
        method(interp, &weakset_proto, name, id)?;
    }

    let thread_proto = interp.builtins().thread_proto.clone();
    method(interp, &thread_proto, "id", "Thread.prototype.id")?;

    let math = interp.new_object();
    {
        let mut borrowed = math.borrow_mut();
        borrowed.set_prop("E", Value::Number(std::f64::consts::E));
        borrowed.set_prop("PI", Value::Number(std::f64::consts::PI));
    }
    for (name, id) in [
        ("floor", "Math.floor"),
        ("ceil", "Math.ceil"),
        ("round", "Math.round"),
        ("abs", "Math.abs"),
        ("sqrt", "Math.sqrt"),
        ("pow", "Math.pow"),
        ("max", "Math.max"),
        ("min", "Math.min"),
    ] {
        method(interp, &math, name, id)?;
    }
    scope.declare_set("Math", Value::Object(math));

    Ok(())
}

/// Binds a constructor in the global scope and links it to its prototype.
fn constructor(
    interp: &Interpreter,
    name: &str,
    id: &str,
    proto: &ObjRef,
) -> EngineResult<ObjRef> {
    let ctor = interp.new_native_function(id)?;
    ctor.borrow_mut()
        .install_prop("prototype", Property::locked(Value::Object(proto.clone())));
    proto
        .borrow_mut()
        .install_prop("constructor", Property::hidden(Value::Object(ctor.clone())));
    interp
        .global_scope()
        .declare_set(name, Value::Object(ctor.clone()));
    Ok(ctor)
}

/// Installs a native method on a prototype (hidden from enumeration).
fn method(interp: &Interpreter, target: &ObjRef, name: &str, id: &str) -> EngineResult<()> {
    let func = interp.new_native_function(id)?;
    target
        .borrow_mut()
        .install_prop(name, Property::hidden(Value::Object(func)));
    Ok(())
}

fn ok(value: Value) -> EngineResult<NativeOutcome> {
    Ok(NativeOutcome::Value(value))
}

fn throw(interp: &Interpreter, class: &str, message: &str) -> EngineResult<NativeOutcome> {
    Ok(NativeOutcome::Throw(interp.new_error_value(class, message)))
}

// --- core globals ---------------------------------------------------------

fn print(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let text = call
        .args
        .iter()
        .map(Value::to_js_string)
        .collect::<Vec<_>>()
        .join(" ");
    log::info!("[world] {text}");
    ok(Value::Undefined)
}

fn string_ctor(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    if call.args.is_empty() {
        return ok(Value::string(""));
    }
    ok(Value::Str(call.arg(0).to_js_string()))
}

fn number_ctor(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    if call.args.is_empty() {
        return ok(Value::Number(0.0));
    }
    ok(Value::Number(call.arg(0).to_number()))
}

fn boolean_ctor(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Bool(call.arg(0).to_boolean()))
}

fn is_nan(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Bool(call.arg(0).to_number().is_nan()))
}

fn is_finite(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Bool(call.arg(0).to_number().is_finite()))
}

fn parse_int(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let text = call.arg(0).to_js_string();
    let text = text.trim();
    let has_hex_prefix = {
        let unsigned = text
            .strip_prefix(|c| c == '-' || c == '+')
            .unwrap_or(text);
        unsigned.starts_with("0x") || unsigned.starts_with("0X")
    };
    let radix = match call.arg(1) {
        Value::Undefined => {
            if has_hex_prefix {
                16
            } else {
                10
            }
        }
        r => {
            let r = r.to_number();
            if r.is_nan() || r == 0.0 {
                if has_hex_prefix {
                    16
                } else {
                    10
                }
            } else {
                r as u32
            }
        }
    };
    if !(2..=36).contains(&radix) {
        return ok(Value::Number(f64::NAN));
    }
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let rest = if radix == 16 {
        rest.strip_prefix("0x")
            .or_else(|| rest.strip_prefix("0X"))
            .unwrap_or(rest)
    } else {
        rest
    };
    let digits: String = rest
        .chars()
        .take_while(|c| c.to_digit(radix).is_some())
        .collect();
    if digits.is_empty() {
        return ok(Value::Number(f64::NAN));
    }
    let mut value = 0.0f64;
    for c in digits.chars() {
        value = value * f64::from(radix) + f64::from(c.to_digit(radix).expect("checked above"));
    }
    ok(Value::Number(if negative { -value } else { value }))
}

fn parse_float(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let text = call.arg(0).to_js_string();
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '0'..='9' => end = i + 1,
            '+' | '-' if i == 0 => {}
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if !seen_exp && end > 0 => {
                seen_exp = true;
            }
            '+' | '-' if seen_exp => {}
            _ => break,
        }
    }
    if end == 0 {
        return ok(Value::Number(f64::NAN));
    }
    ok(Value::Number(js_string_to_number(&trimmed[..end])))
}

// --- Object ---------------------------------------------------------------

fn object_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    match call.arg(0) {
        Value::Object(obj) => ok(Value::Object(obj)),
        _ => ok(Value::Object(interp.new_object())),
    }
}

fn expect_object(
    interp: &Interpreter,
    value: &Value,
    who: &str,
) -> Result<ObjRef, NativeOutcome> {
    match value.as_object() {
        Some(obj) => Ok(obj.clone()),
        None => Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            &format!("{who} called on non-object"),
        ))),
    }
}

fn object_keys(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.keys") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let keys: Vec<Value> = obj
        .borrow()
        .enumerable_keys()
        .into_iter()
        .map(Value::from)
        .collect();
    ok(Value::Object(interp.new_array_of(&keys)))
}

fn object_get_prototype_of(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.getPrototypeOf") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let result = match obj.borrow().proto() {
        Some(proto) => ok(Value::Object(proto)),
        None => ok(Value::Null),
    };
    result
}

fn object_create(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    match call.arg(0) {
        Value::Null => ok(Value::Object(interp.new_object_with_proto(None))),
        Value::Object(proto) => ok(Value::Object(interp.new_object_with_proto(Some(proto)))),
        _ => throw(interp, "TypeError", "Object prototype may only be an object or null"),
    }
}

fn object_define_property(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.defineProperty") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = call.arg(1).to_js_string();
    let desc = match expect_object(interp, &call.arg(2), "Property descriptor") {
        Ok(desc) => desc,
        Err(thrown) => return Ok(thrown),
    };

    let is_new = obj.borrow().own(&key).is_none();
    if is_new && !obj.borrow().is_extensible() {
        return throw(
            interp,
            "TypeError",
            &format!("Cannot define property {key}, object is not extensible"),
        );
    }

    let flag = |name: &str| {
        desc.borrow()
            .own_value(name)
            .map(|v| v.to_boolean())
            .unwrap_or(false)
    };
    let mut attrs = PropertyAttrs::empty();
    if flag("writable") {
        attrs |= PropertyAttrs::WRITABLE;
    }
    if flag("enumerable") {
        attrs |= PropertyAttrs::ENUMERABLE;
    }
    if flag("configurable") {
        attrs |= PropertyAttrs::CONFIGURABLE;
    }
    let value = desc.borrow().own_value("value").unwrap_or(Value::Undefined);
    obj.borrow_mut().install_prop(&key, Property { value, attrs });
    ok(Value::Object(obj))
}

fn object_prevent_extensions(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.preventExtensions") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    obj.borrow_mut().prevent_extensions();
    ok(Value::Object(obj))
}

fn object_is_extensible(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.isExtensible") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let extensible = obj.borrow().is_extensible();
    ok(Value::Bool(extensible))
}

fn object_get_own_property_names(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.arg(0), "Object.getOwnPropertyNames") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let keys: Vec<Value> = obj.borrow().own_keys().into_iter().map(Value::from).collect();
    ok(Value::Object(interp.new_array_of(&keys)))
}

fn object_proto_to_string(
    _interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let class = match call.this.as_object() {
        Some(obj) => obj.borrow().class().name(),
        None => "Object",
    };
    ok(Value::string(format!("[object {class}]")))
}

fn object_has_own_property(
    _interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    let key = call.arg(0).to_js_string();
    let result = call
        .this
        .as_object()
        .is_some_and(|obj| obj.borrow().own(&key).is_some());
    ok(Value::Bool(result))
}

// --- Array ----------------------------------------------------------------

fn array_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    if call.args.len() == 1 {
        if let Value::Number(n) = call.arg(0) {
            let len = n as u32;
            if f64::from(len) != n {
                return throw(interp, "RangeError", "Invalid array length");
            }
            let arr = interp.new_array();
            arr.borrow_mut().set_prop("length", Value::Number(n));
            return ok(Value::Object(arr));
        }
    }
    ok(Value::Object(interp.new_array_of(&call.args)))
}

fn array_push(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Array.prototype.push") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    let mut len = object::array_length(&borrowed);
    for arg in &call.args {
        borrowed.set_prop(&len.to_string(), arg.clone());
        len += 1;
    }
    ok(Value::Number(f64::from(len)))
}

fn array_pop(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Array.prototype.pop") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    let len = object::array_length(&borrowed);
    if len == 0 {
        return ok(Value::Undefined);
    }
    let key = (len - 1).to_string();
    let value = borrowed.own_value(&key).unwrap_or(Value::Undefined);
    borrowed.delete_prop(&key);
    borrowed.set_prop("length", Value::Number(f64::from(len - 1)));
    ok(value)
}

fn array_join(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Array.prototype.join") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let separator = match call.arg(0) {
        Value::Undefined => ",".to_string(),
        sep => sep.to_js_string(),
    };
    let borrowed = obj.borrow();
    let len = object::array_length(&borrowed);
    let parts: Vec<String> = (0..len)
        .map(|i| match borrowed.own_value(&i.to_string()) {
            None | Some(Value::Undefined) | Some(Value::Null) => String::new(),
            Some(v) => v.to_js_string(),
        })
        .collect();
    ok(Value::string(parts.join(&separator)))
}

fn array_index_of(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Array.prototype.indexOf") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let needle = call.arg(0);
    let borrowed = obj.borrow();
    let len = object::array_length(&borrowed);
    for i in 0..len {
        if let Some(v) = borrowed.own_value(&i.to_string()) {
            if v.strict_equals(&needle) {
                return ok(Value::Number(f64::from(i)));
            }
        }
    }
    ok(Value::Number(-1.0))
}

// --- Math -----------------------------------------------------------------

fn math_floor(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(call.arg(0).to_number().floor()))
}

fn math_ceil(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(call.arg(0).to_number().ceil()))
}

fn math_round(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let n = call.arg(0).to_number();
    let rounded = if n.is_finite() { (n + 0.5).floor() } else { n };
    ok(Value::Number(rounded))
}

fn math_abs(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(call.arg(0).to_number().abs()))
}

fn math_sqrt(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(call.arg(0).to_number().sqrt()))
}

fn math_pow(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(
        call.arg(0).to_number().powf(call.arg(1).to_number()),
    ))
}

fn math_max(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let mut best = f64::NEG_INFINITY;
    for arg in &call.args {
        let n = arg.to_number();
        if n.is_nan() {
            return ok(Value::Number(f64::NAN));
        }
        best = best.max(n);
    }
    ok(Value::Number(best))
}

fn math_min(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let mut best = f64::INFINITY;
    for arg in &call.args {
        let n = arg.to_number();
        if n.is_nan() {
            return ok(Value::Number(f64::NAN));
        }
        best = best.min(n);
    }
    ok(Value::Number(best))
}

// --- Date and RegExp ------------------------------------------------------

fn date_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let ms = match call.args.first() {
        None => interp.clock_now() as f64,
        Some(Value::Str(text)) => object::parse_date_iso(text).unwrap_or(f64::NAN),
        Some(v) => v.to_number(),
    };
    ok(Value::Object(interp.new_date(ms)))
}

fn date_now(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(interp.clock_now() as f64))
}

fn date_get_time(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Date.prototype.getTime") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let result = match obj.borrow().slots() {
        InternalSlots::Date(ms) => ok(Value::Number(*ms)),
        _ => throw(interp, "TypeError", "Date.prototype.getTime called on non-Date"),
    };
    result
}

fn date_to_iso_string(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "Date.prototype.toISOString") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let result = match obj.borrow().slots() {
        InternalSlots::Date(ms) => {
            if !ms.is_finite() {
                return throw(interp, "RangeError", "Invalid time value");
            }
            ok(Value::string(object::format_date_iso(*ms)))
        }
        _ => throw(
            interp,
            "TypeError",
            "Date.prototype.toISOString called on non-Date",
        ),
    };
    result
}

fn regexp_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let source = match call.arg(0) {
        Value::Undefined => "(?:)".to_string(),
        v => v.to_js_string(),
    };
    let flags = match call.arg(1) {
        Value::Undefined => String::new(),
        v => v.to_js_string(),
    };
    ok(Value::Object(interp.new_regexp(&source, &flags)))
}

fn regexp_to_string(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match expect_object(interp, &call.this, "RegExp.prototype.toString") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let result = match obj.borrow().slots() {
        InternalSlots::RegExp { source, flags } => ok(Value::string(format!("/{source}/{flags}"))),
        _ => throw(
            interp,
            "TypeError",
            "RegExp.prototype.toString called on non-RegExp",
        ),
    };
    result
}

// --- Errors ---------------------------------------------------------------

fn make_error(interp: &Interpreter, call: &NativeCall, class: &str) -> EngineResult<NativeOutcome> {
    let message = match call.arg(0) {
        Value::Undefined => String::new(),
        v => v.to_js_string(),
    };
    Ok(NativeOutcome::Value(interp.new_error_value(class, &message)))
}

fn error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "Error")
}

fn type_error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "TypeError")
}

fn range_error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "RangeError")
}

fn reference_error_ctor(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "ReferenceError")
}

fn syntax_error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "SyntaxError")
}

fn uri_error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "URIError")
}

fn eval_error_ctor(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "EvalError")
}

fn permission_error_ctor(
    interp: &mut Interpreter,
    call: NativeCall,
) -> EngineResult<NativeOutcome> {
    make_error(interp, &call, "PermissionError")
}

fn error_to_string(_interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let Some(obj) = call.this.as_object() else {
        return ok(Value::string("Error"));
    };
    let borrowed = obj.borrow();
    let name = borrowed
        .lookup_value("name")
        .map(|v| v.to_js_string())
        .unwrap_or_else(|| "Error".to_string());
    let message = borrowed
        .lookup_value("message")
        .map(|v| v.to_js_string())
        .unwrap_or_default();
    if message.is_empty() {
        ok(Value::Str(name))
    } else {
        ok(Value::string(format!("{name}: {message}")))
    }
}

// --- Maps, sets, and weak containers --------------------------------------

fn map_ctor(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Object(ObjRef::new(PsObject::with_slots(
        ClassTag::Map,
        Some(interp.builtins().map_proto.clone()),
        InternalSlots::Map(Vec::new()),
    ))))
}

fn set_ctor(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Object(ObjRef::new(PsObject::with_slots(
        ClassTag::Set,
        Some(interp.builtins().set_proto.clone()),
        InternalSlots::Set(Vec::new()),
    ))))
}

fn weakmap_ctor(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Object(ObjRef::new(PsObject::with_slots(
        ClassTag::WeakMap,
        Some(interp.builtins().weakmap_proto.clone()),
        InternalSlots::WeakMap(IterableWeakMap::new()),
    ))))
}

fn weakset_ctor(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Object(ObjRef::new(PsObject::with_slots(
        ClassTag::WeakSet,
        Some(interp.builtins().weakset_proto.clone()),
        InternalSlots::WeakSet(IterableWeakSet::new()),
    ))))
}

fn map_receiver(
    interp: &Interpreter,
    call: &NativeCall,
    who: &str,
) -> Result<ObjRef, NativeOutcome> {
    let obj = expect_object(interp, &call.this, who)?;
    if obj.borrow().class() != ClassTag::Map {
        return Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            &format!("{who} called on a non-Map"),
        )));
    }
    Ok(obj)
}

fn map_get(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match map_receiver(interp, &call, "Map.prototype.get") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = call.arg(0);
    let borrowed = obj.borrow();
    if let InternalSlots::Map(entries) = borrowed.slots() {
        for (k, v) in entries {
            if k.same_value_zero(&key) {
                return ok(v.clone());
            }
        }
    }
    ok(Value::Undefined)
}

fn map_set(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match map_receiver(interp, &call, "Map.prototype.set") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = call.arg(0);
    let value = call.arg(1);
    {
        let mut borrowed = obj.borrow_mut();
        if let InternalSlots::Map(entries) = borrowed.slots_mut() {
            match entries.iter_mut().find(|(k, _)| k.same_value_zero(&key)) {
                Some((_, slot)) => *slot = value,
                None => entries.push((key, value)),
            }
        }
    }
    ok(Value::Object(obj))
}

fn map_has(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match map_receiver(interp, &call, "Map.prototype.has") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = call.arg(0);
    let borrowed = obj.borrow();
    let found = matches!(
        borrowed.slots(),
        InternalSlots::Map(entries) if entries.iter().any(|(k, _)| k.same_value_zero(&key))
    );
    ok(Value::Bool(found))
}

fn map_delete(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match map_receiver(interp, &call, "Map.prototype.delete") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = call.arg(0);
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::Map(entries) = borrowed.slots_mut() {
        let before = entries.len();
        entries.retain(|(k, _)| !k.same_value_zero(&key));
        return ok(Value::Bool(entries.len() != before));
    }
    ok(Value::Bool(false))
}

fn map_size(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match map_receiver(interp, &call, "Map.prototype.size") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let borrowed = obj.borrow();
    let size = match borrowed.slots() {
        InternalSlots::Map(entries) => entries.len(),
        _ => 0,
    };
    ok(Value::Number(size as f64))
}

fn set_receiver(
    interp: &Interpreter,
    call: &NativeCall,
    who: &str,
) -> Result<ObjRef, NativeOutcome> {
    let obj = expect_object(interp, &call.this, who)?;
    if obj.borrow().class() != ClassTag::Set {
        return Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            &format!("{who} called on a non-Set"),
        )));
    }
    Ok(obj)
}

fn set_add(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match set_receiver(interp, &call, "Set.prototype.add") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = call.arg(0);
    {
        let mut borrowed = obj.borrow_mut();
        if let InternalSlots::Set(members) = borrowed.slots_mut() {
            if !members.iter().any(|m| m.same_value_zero(&member)) {
                members.push(member);
            }
        }
    }
    ok(Value::Object(obj))
}

fn set_has(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match set_receiver(interp, &call, "Set.prototype.has") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = call.arg(0);
    let borrowed = obj.borrow();
    let found = matches!(
        borrowed.slots(),
        InternalSlots::Set(members) if members.iter().any(|m| m.same_value_zero(&member))
    );
    ok(Value::Bool(found))
}

fn set_delete(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match set_receiver(interp, &call, "Set.prototype.delete") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = call.arg(0);
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::Set(members) = borrowed.slots_mut() {
        let before = members.len();
        members.retain(|m| !m.same_value_zero(&member));
        return ok(Value::Bool(members.len() != before));
    }
    ok(Value::Bool(false))
}

fn set_size(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match set_receiver(interp, &call, "Set.prototype.size") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let borrowed = obj.borrow();
    let size = match borrowed.slots() {
        InternalSlots::Set(members) => members.len(),
        _ => 0,
    };
    ok(Value::Number(size as f64))
}

fn weak_key(interp: &Interpreter, value: &Value) -> Result<ObjRef, NativeOutcome> {
    match value.as_object() {
        Some(obj) => Ok(obj.clone()),
        None => Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            "Invalid value used in weak container",
        ))),
    }
}

fn weakmap_receiver(
    interp: &Interpreter,
    call: &NativeCall,
    who: &str,
) -> Result<ObjRef, NativeOutcome> {
    let obj = expect_object(interp, &call.this, who)?;
    if obj.borrow().class() != ClassTag::WeakMap {
        return Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            &format!("{who} called on a non-WeakMap"),
        )));
    }
    Ok(obj)
}

fn weakmap_get(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakmap_receiver(interp, &call, "WeakMap.prototype.get") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = match weak_key(interp, &call.arg(0)) {
        Ok(key) => key,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakMap(map) = borrowed.slots_mut() {
        return ok(map.get(&key).unwrap_or(Value::Undefined));
    }
    ok(Value::Undefined)
}

fn weakmap_set(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakmap_receiver(interp, &call, "WeakMap.prototype.set") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = match weak_key(interp, &call.arg(0)) {
        Ok(key) => key,
        Err(thrown) => return Ok(thrown),
    };
    let value = call.arg(1);
    {
        let mut borrowed = obj.borrow_mut();
        if let InternalSlots::WeakMap(map) = borrowed.slots_mut() {
            map.set(&key, value);
        }
    }
    ok(Value::Object(obj))
}

fn weakmap_has(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakmap_receiver(interp, &call, "WeakMap.prototype.has") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = match weak_key(interp, &call.arg(0)) {
        Ok(key) => key,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakMap(map) = borrowed.slots_mut() {
        return ok(Value::Bool(map.has(&key)));
    }
    ok(Value::Bool(false))
}

fn weakmap_delete(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakmap_receiver(interp, &call, "WeakMap.prototype.delete") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let key = match weak_key(interp, &call.arg(0)) {
        Ok(key) => key,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakMap(map) = borrowed.slots_mut() {
        return ok(Value::Bool(map.delete(&key)));
    }
    ok(Value::Bool(false))
}

fn weakmap_size(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakmap_receiver(interp, &call, "WeakMap.prototype.size") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakMap(map) = borrowed.slots_mut() {
        return ok(Value::Number(map.size() as f64));
    }
    ok(Value::Number(0.0))
}

fn weakset_receiver(
    interp: &Interpreter,
    call: &NativeCall,
    who: &str,
) -> Result<ObjRef, NativeOutcome> {
    let obj = expect_object(interp, &call.this, who)?;
    if obj.borrow().class() != ClassTag::WeakSet {
        return Err(NativeOutcome::Throw(interp.new_error_value(
            "TypeError",
            &format!("{who} called on a non-WeakSet"),
        )));
    }
    Ok(obj)
}

fn weakset_add(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakset_receiver(interp, &call, "WeakSet.prototype.add") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = match weak_key(interp, &call.arg(0)) {
        Ok(member) => member,
        Err(thrown) => return Ok(thrown),
    };
    {
        let mut borrowed = obj.borrow_mut();
        if let InternalSlots::WeakSet(set) = borrowed.slots_mut() {
            set.add(&member);
        }
    }
    ok(Value::Object(obj))
}

fn weakset_has(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakset_receiver(interp, &call, "WeakSet.prototype.has") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = match weak_key(interp, &call.arg(0)) {
        Ok(member) => member,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakSet(set) = borrowed.slots_mut() {
        return ok(Value::Bool(set.has(&member)));
    }
    ok(Value::Bool(false))
}

fn weakset_delete(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakset_receiver(interp, &call, "WeakSet.prototype.delete") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let member = match weak_key(interp, &call.arg(0)) {
        Ok(member) => member,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakSet(set) = borrowed.slots_mut() {
        return ok(Value::Bool(set.delete(&member)));
    }
    ok(Value::Bool(false))
}

fn weakset_size(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakset_receiver(interp, &call, "WeakSet.prototype.size") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let mut borrowed = obj.borrow_mut();
    if let InternalSlots::WeakSet(set) = borrowed.slots_mut() {
        return ok(Value::Number(set.size() as f64));
    }
    ok(Value::Number(0.0))
}

fn weakset_values(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let obj = match weakset_receiver(interp, &call, "WeakSet.prototype.values") {
        Ok(obj) => obj,
        Err(thrown) => return Ok(thrown),
    };
    let members: Vec<Value> = {
        let mut borrowed = obj.borrow_mut();
        match borrowed.slots_mut() {
            InternalSlots::WeakSet(set) => {
                set.iter_live().into_iter().map(Value::Object).collect()
            }
            _ => Vec::new(),
        }
    };
    ok(Value::Object(interp.new_array_of(&members)))
}

// --- Threads --------------------------------------------------------------

fn spawn_thread(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let func = call.arg(0);
    let is_declared = func.as_object().is_some_and(|obj| {
        matches!(
            obj.borrow().slots(),
            InternalSlots::Function(crate::object::FunctionSlots::Declared { .. })
        )
    });
    if !is_declared {
        return throw(interp, "TypeError", "spawn expects a function");
    }
    let args = call.args.get(1..).unwrap_or_default().to_vec();
    let tid = interp.spawn_call(&func, Value::Undefined, args)?;
    ok(Value::Object(interp.new_thread_handle(tid)))
}

fn thread_of(value: &Value) -> Option<ThreadId> {
    let obj = value.as_object()?;
    let borrowed = obj.borrow();
    match borrowed.slots() {
        InternalSlots::Thread(id) => Some(ThreadId(*id)),
        _ => None,
    }
}

fn kill_thread(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let Some(tid) = thread_of(&call.arg(0)) else {
        return throw(interp, "TypeError", "kill expects a thread");
    };
    match interp.kill(tid) {
        Ok(()) => ok(Value::Undefined),
        // An already-reaped thread is as dead as a killed one.
        Err(crate::error::EngineError::NoSuchThread { .. }) => ok(Value::Undefined),
        Err(err) => Err(err),
    }
}

fn sleep_thread(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let ms = call.arg(0).to_number();
    let ms = if ms.is_nan() || ms < 0.0 { 0.0 } else { ms };
    Ok(NativeOutcome::Sleep {
        until_ms: interp.clock_now() + ms as u64,
    })
}

fn suspend_thread(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    // Yield: wake immediately, but go to the back of the line.
    Ok(NativeOutcome::Sleep {
        until_ms: interp.clock_now(),
    })
}

fn current_thread(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Object(interp.new_thread_handle(call.thread)))
}

fn clock_ms(interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    ok(Value::Number(interp.clock_now() as f64))
}

fn thread_handle_id(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    match thread_of(&call.this) {
        Some(tid) => ok(Value::Number(tid.0 as f64)),
        None => throw(interp, "TypeError", "id called on a non-thread"),
    }
}
