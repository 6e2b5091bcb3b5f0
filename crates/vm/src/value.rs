//! Value model for the burrow interpreter.
//!
//! A [`Value`] is either a primitive or a handle into the pseudo-heap.
//! Coercions follow JavaScript semantics with one deliberate exception:
//! object-to-primitive conversion is computed natively and never re-enters
//! user code, so a single engine step stays indivisible.

use std::fmt;

use crate::heap::{ObjRef, PtrKey};
use crate::object::{ClassTag, FunctionSlots, InternalSlots};

/// Hint passed to [`Value::to_primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveHint {
    Default,
    Number,
    String,
}

/// A user-level value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(ObjRef),
}

impl Value {
    /// Creates a string value.
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    /// Creates a number value.
    pub fn number(n: f64) -> Self {
        Value::Number(n)
    }

    /// Returns the `typeof` string for this value.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(o) => match o.borrow().class() {
                ClassTag::Function => "function",
                _ => "object",
            },
        }
    }

    /// Returns true for every value that is not a pseudo-object handle.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Object(_))
    }

    /// Returns the object handle, if this value is one.
    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Boolean coercion.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Numeric coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => js_string_to_number(s),
            Value::Object(_) => self.to_primitive(PrimitiveHint::Number).to_number(),
        }
    }

    /// String coercion.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => js_number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Object(_) => self
                .to_primitive(PrimitiveHint::String)
                .to_js_string(),
        }
    }

    /// Primitive coercion.
    ///
    /// Primitives return themselves; objects are rendered without calling
    /// back into user code.
    pub fn to_primitive(&self, hint: PrimitiveHint) -> Value {
        match self {
            Value::Object(o) => {
                let mut seen = Vec::new();
                object_to_primitive(o, hint, &mut seen)
            }
            other => other.clone(),
        }
    }

    /// Strict equality (`===`): no coercion.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose equality (`==`): the JavaScript coercion table.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Number(_), Value::Number(_))
            | (Value::Str(_), Value::Str(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Object(_), Value::Object(_)) => self.strict_equals(other),
            (Value::Number(a), Value::Str(_)) => *a == other.to_number(),
            (Value::Str(_), Value::Number(b)) => self.to_number() == *b,
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Value::Object(_), Value::Number(_) | Value::Str(_)) => self
                .to_primitive(PrimitiveHint::Default)
                .loose_equals(other),
            (Value::Number(_) | Value::Str(_), Value::Object(_)) => {
                self.loose_equals(&other.to_primitive(PrimitiveHint::Default))
            }
            _ => false,
        }
    }

    /// SameValueZero: strict equality except `NaN` matches itself.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        if let (Value::Number(a), Value::Number(b)) = (self, other) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
        }
        self.strict_equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

fn object_to_primitive(o: &ObjRef, hint: PrimitiveHint, seen: &mut Vec<PtrKey>) -> Value {
    if seen.contains(&o.ptr_key()) {
        // Cyclic structure; render the revisited node as empty.
        return Value::Str(String::new());
    }
    seen.push(o.ptr_key());

    let obj = o.borrow();
    let result = match (obj.class(), obj.slots()) {
        (ClassTag::Date, InternalSlots::Date(ts)) => {
            if hint == PrimitiveHint::Number {
                Value::Number(*ts)
            } else {
                Value::Str(crate::object::format_date_iso(*ts))
            }
        }
        (ClassTag::RegExp, InternalSlots::RegExp { source, flags }) => {
            Value::Str(format!("/{source}/{flags}"))
        }
        (ClassTag::Function, slots) => match slots {
            InternalSlots::Function(FunctionSlots::Native { id }) => {
                Value::Str(format!("function {id}() {{ [native code] }}"))
            }
            InternalSlots::Function(FunctionSlots::Declared { name, .. }) => Value::Str(format!(
                "function {}() {{ ... }}",
                name.clone().unwrap_or_default()
            )),
            _ => Value::Str("function () { ... }".to_string()),
        },
        (ClassTag::Array, _) => {
            let len = crate::object::array_length(&obj);
            let mut parts = Vec::with_capacity(len as usize);
            for i in 0..len {
                let element = obj.own_value(&i.to_string()).unwrap_or_default();
                let text = match element {
                    Value::Undefined | Value::Null => String::new(),
                    Value::Object(ref inner) => {
                        object_to_primitive(inner, PrimitiveHint::String, seen).to_js_string()
                    }
                    other => other.to_js_string(),
                };
                parts.push(text);
            }
            Value::Str(parts.join(","))
        }
        (ClassTag::Error, _) => {
            let name = obj
                .lookup_value("name")
                .map(|v| v.to_js_string())
                .unwrap_or_else(|| "Error".to_string());
            let message = obj
                .lookup_value("message")
                .map(|v| v.to_js_string())
                .unwrap_or_default();
            if message.is_empty() {
                Value::Str(name)
            } else {
                Value::Str(format!("{name}: {message}"))
            }
        }
        (class, _) => Value::Str(format!("[object {}]", class.name())),
    };
    seen.pop();
    result
}

/// Formats a number the way JavaScript's `String(n)` does.
pub fn js_number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        // Negative zero prints as plain zero.
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

/// Parses a string the way JavaScript's `Number(s)` does.
pub fn js_string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToInt32 modular truncation.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32 modular truncation.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 4_294_967_296.0;
    let mut m = n.trunc() % modulus;
    if m < 0.0 {
        m += modulus;
    }
    m as u32
}

/// Returns true for `-0.0` exactly.
pub fn is_negative_zero(n: f64) -> bool {
    n == 0.0 && n.is_sign_negative()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(js_number_to_string(42.0), "42");
        assert_eq!(js_number_to_string(-0.0), "0");
        assert_eq!(js_number_to_string(f64::NAN), "NaN");
        assert_eq!(js_number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(js_number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(js_number_to_string(1.5), "1.5");
    }

    #[test]
    fn string_parsing() {
        assert_eq!(js_string_to_number(""), 0.0);
        assert_eq!(js_string_to_number("  12  "), 12.0);
        assert_eq!(js_string_to_number("0x10"), 16.0);
        assert_eq!(js_string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(js_string_to_number("12px").is_nan());
        assert!(js_string_to_number("nope").is_nan());
    }

    #[test]
    fn modular_truncation() {
        assert_eq!(to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn strict_vs_loose() {
        assert!(Value::Number(0.0).strict_equals(&Value::Number(-0.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        assert!(Value::Number(f64::NAN).same_value_zero(&Value::Number(f64::NAN)));
        assert!(!Value::Number(1.0).strict_equals(&Value::Str("1".into())));
        assert!(Value::Number(1.0).loose_equals(&Value::Str("1".into())));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.to_boolean());
        assert!(!Value::Str(String::new()).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::Str("0".into()).to_boolean());
        assert!(Value::Number(-1.0).to_boolean());
    }
}
