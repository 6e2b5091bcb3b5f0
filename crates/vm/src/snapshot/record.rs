//! Record-level value encoding.
//!
//! The transport format cannot carry every scalar directly, so the special
//! numbers and `undefined` ride in tagged one-field objects:
//! `{"Value": "undefined"}`, `{"Number": "NaN" | "Infinity" | "-Infinity" |
//! "-0"}`. References are `{"#": index}`.

use std::collections::HashMap;

use serde_json::{json, Value as Json};

use crate::error::EngineError;
use crate::heap::PtrKey;
use crate::object::ClassTag;
use crate::thread::Abrupt;
use crate::value::{is_negative_zero, Value};

/// Identity of one snapshot entity across both passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EntKey {
    Interp,
    Ast,
    Registry,
    Obj(PtrKey),
    Scope(PtrKey),
    State(u32),
    Thread(u64),
}

/// Classes whose instances never enter a snapshot; references to them
/// encode as `null`.
pub(crate) fn is_excluded(class: ClassTag) -> bool {
    matches!(class, ClassTag::Server)
}

/// Per-class own-property names the encoder omits.
pub(crate) fn prune_list(class: ClassTag) -> &'static [&'static str] {
    match class {
        ClassTag::Server => &["socket"],
        _ => &[],
    }
}

/// Encodes one value into record JSON.
pub(crate) fn encode_value(
    value: &Value,
    ids: &HashMap<EntKey, usize>,
) -> Result<Json, EngineError> {
    Ok(match value {
        Value::Undefined => json!({"Value": "undefined"}),
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            if n.is_nan() {
                json!({"Number": "NaN"})
            } else if *n == f64::INFINITY {
                json!({"Number": "Infinity"})
            } else if *n == f64::NEG_INFINITY {
                json!({"Number": "-Infinity"})
            } else if is_negative_zero(*n) {
                json!({"Number": "-0"})
            } else {
                json!(n)
            }
        }
        Value::Str(s) => Json::String(s.clone()),
        Value::Object(obj) => {
            if is_excluded(obj.borrow().class()) {
                Json::Null
            } else {
                let index = ids.get(&EntKey::Obj(obj.ptr_key())).ok_or_else(|| {
                    EngineError::snapshot("value references an unvisited object")
                })?;
                json!({"#": index})
            }
        }
    })
}

/// Encodes an abrupt completion.
pub(crate) fn encode_abrupt(
    abrupt: &Abrupt,
    ids: &HashMap<EntKey, usize>,
) -> Result<Json, EngineError> {
    Ok(match abrupt {
        Abrupt::Break(label) => json!({"kind": "break", "label": label}),
        Abrupt::Continue(label) => json!({"kind": "continue", "label": label}),
        Abrupt::Return(v) => json!({"kind": "return", "value": encode_value(v, ids)?}),
        Abrupt::Throw(v) => json!({"kind": "throw", "value": encode_value(v, ids)?}),
    })
}

/// Renders a `{"#": n}` reference.
pub(crate) fn reference(ids: &HashMap<EntKey, usize>, key: EntKey) -> Result<Json, EngineError> {
    let index = ids
        .get(&key)
        .ok_or_else(|| EngineError::snapshot("reference to an unvisited entity"))?;
    Ok(json!({"#": index}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_scalars() {
        let ids = HashMap::new();
        assert_eq!(
            encode_value(&Value::Undefined, &ids).unwrap(),
            json!({"Value": "undefined"})
        );
        assert_eq!(encode_value(&Value::Null, &ids).unwrap(), Json::Null);
        assert_eq!(
            encode_value(&Value::Number(f64::NAN), &ids).unwrap(),
            json!({"Number": "NaN"})
        );
        assert_eq!(
            encode_value(&Value::Number(-0.0), &ids).unwrap(),
            json!({"Number": "-0"})
        );
        assert_eq!(
            encode_value(&Value::Number(f64::NEG_INFINITY), &ids).unwrap(),
            json!({"Number": "-Infinity"})
        );
        assert_eq!(encode_value(&Value::Number(1.5), &ids).unwrap(), json!(1.5));
    }
}
