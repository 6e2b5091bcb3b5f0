//! Snapshot encoder.
//!
//! A depth-first walk from the interpreter root assigns every reachable
//! entity its record index on first visit; a second sweep renders the
//! records. Two identically-built worlds therefore produce identical
//! snapshots, and shared substructure is emitted exactly once.

use std::collections::HashMap;

use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{EngineError, EngineResult};
use crate::heap::ObjRef;
use crate::interp::Interpreter;
use crate::object::{ClassTag, FunctionSlots, InternalSlots, PropertyAttrs};
use crate::scope::{ScopePolicy, ScopeRef};
use crate::step::StateIx;
use crate::thread::{Abrupt, Blocker, Thread};
use crate::value::Value;

use super::record::{
    encode_abrupt, encode_value, is_excluded, prune_list, reference, EntKey,
};
use super::SNAPSHOT_VERSION;

/// One reachable entity.
#[derive(Debug, Clone)]
enum Ent {
    Interp,
    Ast,
    Registry,
    Obj(ObjRef),
    Scope(ScopeRef),
    State(StateIx),
    Thread(u64),
}

impl Ent {
    fn key(&self) -> EntKey {
        match self {
            Ent::Interp => EntKey::Interp,
            Ent::Ast => EntKey::Ast,
            Ent::Registry => EntKey::Registry,
            Ent::Obj(obj) => EntKey::Obj(obj.ptr_key()),
            Ent::Scope(scope) => EntKey::Scope(scope.ptr_key()),
            Ent::State(ix) => EntKey::State(ix.0),
            Ent::Thread(id) => EntKey::Thread(*id),
        }
    }
}

pub(super) fn encode(interp: &Interpreter) -> EngineResult<Vec<Json>> {
    // Pass one: fix the numbering by traversal order.
    let mut ids: HashMap<EntKey, usize> = HashMap::new();
    let mut order: Vec<Ent> = Vec::new();
    let mut stack = vec![Ent::Interp];
    while let Some(ent) = stack.pop() {
        let key = ent.key();
        if ids.contains_key(&key) {
            continue;
        }
        ids.insert(key, order.len());
        let kids = children(interp, &ent)?;
        order.push(ent);
        for kid in kids.into_iter().rev() {
            if !ids.contains_key(&kid.key()) {
                stack.push(kid);
            }
        }
    }

    // Pass two: render each record with the now-complete index map.
    let mut records = Vec::with_capacity(order.len());
    for (index, ent) in order.iter().enumerate() {
        records.push(render(interp, ent, index, &ids)?);
    }
    log::info!("snapshot encoded: {} records", records.len());
    Ok(records)
}

/// Wraps an object value as a child entity unless its class is excluded.
fn value_child(value: &Value, out: &mut Vec<Ent>) {
    if let Value::Object(obj) = value {
        if !is_excluded(obj.borrow().class()) {
            out.push(Ent::Obj(obj.clone()));
        }
    }
}

fn abrupt_child(abrupt: &Abrupt, out: &mut Vec<Ent>) {
    match abrupt {
        Abrupt::Return(v) | Abrupt::Throw(v) => value_child(v, out),
        _ => {}
    }
}

fn children(interp: &Interpreter, ent: &Ent) -> EngineResult<Vec<Ent>> {
    let mut out = Vec::new();
    match ent {
        Ent::Interp => {
            out.push(Ent::Ast);
            out.push(Ent::Registry);
            out.push(Ent::Scope(interp.global_scope().clone()));
            for (_, proto) in interp.builtins().proto_entries() {
                out.push(Ent::Obj(proto));
            }
            // Killed threads are dead at the next scheduling point; a
            // snapshot taken before that point treats them as gone.
            for thread in interp.threads() {
                if !thread.killed {
                    out.push(Ent::Thread(thread.id.0));
                }
            }
        }
        Ent::Ast => {}
        Ent::Registry => {
            for obj in interp.registry().objects() {
                if !is_excluded(obj.borrow().class()) {
                    out.push(Ent::Obj(obj.clone()));
                }
            }
        }
        Ent::Obj(obj) => {
            let pruned = prune_list(obj.borrow().class());
            {
                let borrowed = obj.borrow();
                if let Some(proto) = borrowed.proto() {
                    out.push(Ent::Obj(proto));
                }
                for (key, prop) in borrowed.props() {
                    if !pruned.contains(&key) {
                        value_child(&prop.value, &mut out);
                    }
                }
                match borrowed.slots() {
                    InternalSlots::Function(FunctionSlots::Declared { scope, .. }) => {
                        out.push(Ent::Scope(scope.clone()));
                    }
                    InternalSlots::Map(entries) => {
                        for (k, v) in entries {
                            value_child(k, &mut out);
                            value_child(v, &mut out);
                        }
                    }
                    InternalSlots::Set(members) => {
                        for m in members {
                            value_child(m, &mut out);
                        }
                    }
                    _ => {}
                }
            }
            // Weak containers compact on observation, which needs &mut.
            let weak_children: Vec<Ent> = {
                let mut borrowed = obj.borrow_mut();
                match borrowed.slots_mut() {
                    InternalSlots::WeakMap(map) => map
                        .iter_live()
                        .into_iter()
                        .flat_map(|(k, v)| {
                            let mut pair = vec![Ent::Obj(k)];
                            value_child(&v, &mut pair);
                            pair
                        })
                        .collect(),
                    InternalSlots::WeakSet(set) => {
                        set.iter_live().into_iter().map(Ent::Obj).collect()
                    }
                    _ => Vec::new(),
                }
            };
            out.extend(weak_children);
        }
        Ent::Scope(scope) => {
            let borrowed = scope.borrow();
            if let Some(parent) = borrowed.parent() {
                out.push(Ent::Scope(parent));
            }
            value_child(&borrowed.this_value(), &mut out);
            for (_, value) in borrowed.vars() {
                value_child(value, &mut out);
            }
        }
        Ent::State(ix) => {
            let state = interp.states().get(*ix)?;
            if let Some(parent) = state.parent {
                out.push(Ent::State(parent));
            }
            out.push(Ent::Scope(state.scope.clone()));
            for value in &state.values {
                value_child(value, &mut out);
            }
            if let Some(saved) = &state.saved {
                abrupt_child(saved, &mut out);
            }
        }
        Ent::Thread(id) => {
            let thread = interp.thread(crate::thread::ThreadId(*id))?;
            if let Some(current) = thread.current {
                out.push(Ent::State(current));
            }
            value_child(&thread.result, &mut out);
            if let Some(pending) = &thread.pending {
                abrupt_child(pending, &mut out);
            }
        }
    }
    Ok(out)
}

fn render(
    interp: &Interpreter,
    ent: &Ent,
    index: usize,
    ids: &HashMap<EntKey, usize>,
) -> EngineResult<Json> {
    match ent {
        Ent::Interp => render_interp(interp, ids),
        Ent::Ast => {
            let arena = serde_json::to_value(interp.ast())
                .map_err(|e| EngineError::snapshot(format!("ast serialization: {e}")))?;
            Ok(json!({"type": "Ast", "#": index, "arena": arena}))
        }
        Ent::Registry => {
            let mut entries = JsonMap::new();
            for (name, obj) in interp.registry().iter() {
                entries.insert(
                    name.to_string(),
                    encode_value(&Value::Object(obj.clone()), ids)?,
                );
            }
            Ok(json!({"type": "Registry", "#": index, "entries": entries}))
        }
        Ent::Obj(obj) => render_object(interp, obj, index, ids),
        Ent::Scope(scope) => {
            let borrowed = scope.borrow();
            let parent = match borrowed.parent() {
                Some(parent) => reference(ids, EntKey::Scope(parent.ptr_key()))?,
                None => Json::Null,
            };
            let mut vars = JsonMap::new();
            for (name, value) in borrowed.vars() {
                vars.insert(name.to_string(), encode_value(value, ids)?);
            }
            Ok(json!({
                "type": "Scope",
                "#": index,
                "parent": parent,
                "this": encode_value(&borrowed.this_value(), ids)?,
                "vars": vars,
            }))
        }
        Ent::State(ix) => {
            let state = interp.states().get(*ix)?;
            let mut rec = JsonMap::new();
            rec.insert("type".into(), json!("State"));
            rec.insert("#".into(), json!(index));
            rec.insert("node".into(), json!(state.node.0));
            rec.insert(
                "parent".into(),
                match state.parent {
                    Some(parent) => reference(ids, EntKey::State(parent.0))?,
                    None => Json::Null,
                },
            );
            rec.insert(
                "scope".into(),
                reference(ids, EntKey::Scope(state.scope.ptr_key()))?,
            );
            rec.insert("phase".into(), json!(state.phase));
            rec.insert("index".into(), json!(state.index));
            rec.insert("aux".into(), json!(state.aux));
            let values: Vec<Json> = state
                .values
                .iter()
                .map(|v| encode_value(v, ids))
                .collect::<Result<_, _>>()?;
            rec.insert("values".into(), Json::Array(values));
            rec.insert("keys".into(), json!(state.keys));
            if let Some(label) = &state.label {
                rec.insert("label".into(), json!(label));
            }
            if let Some(saved) = &state.saved {
                rec.insert("saved".into(), encode_abrupt(saved, ids)?);
            }
            Ok(Json::Object(rec))
        }
        Ent::Thread(id) => {
            let thread = interp.thread(crate::thread::ThreadId(*id))?;
            render_thread(thread, index, ids)
        }
    }
}

fn render_interp(interp: &Interpreter, ids: &HashMap<EntKey, usize>) -> EngineResult<Json> {
    let mut protos = JsonMap::new();
    for (name, proto) in interp.builtins().proto_entries() {
        protos.insert(
            name.to_string(),
            reference(ids, EntKey::Obj(proto.ptr_key()))?,
        );
    }
    let threads: Vec<Json> = interp
        .threads()
        .filter(|t| !t.killed)
        .map(|t| reference(ids, EntKey::Thread(t.id.0)))
        .collect::<Result<_, _>>()?;
    let runnable: Vec<Json> = interp
        .scheduler()
        .runnable_order()
        .filter(|tid| {
            interp
                .thread(*tid)
                .map(|t| !t.killed)
                .unwrap_or(false)
        })
        .map(|tid| json!(tid.0))
        .collect();
    let policy = match interp.scope_policy() {
        ScopePolicy::Throw => "throw",
        ScopePolicy::CreateOnGlobal => "createOnGlobal",
    };
    Ok(json!({
        "type": "Interpreter",
        "#": 0,
        "version": SNAPSHOT_VERSION,
        "ast": reference(ids, EntKey::Ast)?,
        "registry": reference(ids, EntKey::Registry)?,
        "globalScope": reference(ids, EntKey::Scope(interp.global_scope().ptr_key()))?,
        "protos": protos,
        "threads": threads,
        "runnable": runnable,
        "nextThreadId": interp.next_thread_id(),
        "policy": policy,
    }))
}

fn render_thread(
    thread: &Thread,
    index: usize,
    ids: &HashMap<EntKey, usize>,
) -> EngineResult<Json> {
    let mut rec = JsonMap::new();
    rec.insert("type".into(), json!("Thread"));
    rec.insert("#".into(), json!(index));
    rec.insert("id".into(), json!(thread.id.0));
    rec.insert("status".into(), json!(thread.status.name()));
    if let Some(wake_at) = thread.wake_at {
        rec.insert("wakeAt".into(), json!(wake_at));
    }
    if let Some(blocker) = &thread.blocker {
        let blocker = match blocker {
            Blocker::Handle(h) => json!({"handle": h}),
            Blocker::Named(n) => json!({"named": n}),
        };
        rec.insert("blocker".into(), blocker);
    }
    rec.insert(
        "state".into(),
        match thread.current {
            Some(current) => reference(ids, EntKey::State(current.0))?,
            None => Json::Null,
        },
    );
    if let Some(pending) = &thread.pending {
        rec.insert("pending".into(), encode_abrupt(pending, ids)?);
    }
    rec.insert("result".into(), encode_value(&thread.result, ids)?);
    rec.insert("callDepth".into(), json!(thread.call_depth));
    Ok(Json::Object(rec))
}

fn render_object(
    interp: &Interpreter,
    obj: &ObjRef,
    index: usize,
    ids: &HashMap<EntKey, usize>,
) -> EngineResult<Json> {
    let class = obj.borrow().class();
    let mut rec = JsonMap::new();
    let type_tag = match class {
        ClassTag::Object => "Object",
        ClassTag::Function => "Function",
        ClassTag::Array => "Array",
        ClassTag::Date => "Date",
        ClassTag::RegExp => "RegExp",
        ClassTag::Error => "Error",
        ClassTag::Arguments => "Arguments",
        ClassTag::Map => "Map",
        ClassTag::Set => "Set",
        ClassTag::WeakMap => "IterableWeakMap",
        ClassTag::WeakSet => "IterableWeakSet",
        ClassTag::Thread => "ThreadHandle",
        ClassTag::Box => "Box",
        ClassTag::Server => {
            return Err(EngineError::snapshot("excluded class reached the encoder"))
        }
    };
    rec.insert("type".into(), json!(type_tag));
    rec.insert("#".into(), json!(index));

    // Prototype, only when it differs from the class default.
    {
        let borrowed = obj.borrow();
        let default = interp.builtins().default_proto(class);
        match borrowed.proto() {
            Some(proto) if proto.ptr_eq(&default) => {}
            Some(proto) => {
                rec.insert("proto".into(), reference(ids, EntKey::Obj(proto.ptr_key()))?);
            }
            None => {
                rec.insert("proto".into(), Json::Null);
            }
        }
    }

    // Class-specific payloads.
    {
        let borrowed = obj.borrow();
        match borrowed.slots() {
            InternalSlots::Function(FunctionSlots::Native { id }) => {
                rec.insert("id".into(), json!(id));
            }
            InternalSlots::Function(FunctionSlots::Declared {
                params,
                body,
                scope,
                name,
            }) => {
                rec.insert("params".into(), json!(params));
                rec.insert("body".into(), json!(body.0));
                rec.insert(
                    "scope".into(),
                    reference(ids, EntKey::Scope(scope.ptr_key()))?,
                );
                if let Some(name) = name {
                    rec.insert("name".into(), json!(name));
                }
            }
            InternalSlots::Date(ms) => {
                rec.insert("data".into(), json!(crate::object::format_date_iso(*ms)));
            }
            InternalSlots::RegExp { source, flags } => {
                rec.insert("source".into(), json!(source));
                rec.insert("flags".into(), json!(flags));
            }
            InternalSlots::Map(map_entries) => {
                let pairs: Vec<Json> = map_entries
                    .iter()
                    .map(|(k, v)| {
                        Ok(Json::Array(vec![
                            encode_value(k, ids)?,
                            encode_value(v, ids)?,
                        ]))
                    })
                    .collect::<EngineResult<_>>()?;
                rec.insert("entries".into(), Json::Array(pairs));
            }
            InternalSlots::Set(members) => {
                let data: Vec<Json> = members
                    .iter()
                    .map(|m| encode_value(m, ids))
                    .collect::<Result<_, _>>()?;
                rec.insert("data".into(), Json::Array(data));
            }
            InternalSlots::Thread(id) => {
                rec.insert("thread".into(), json!(id));
            }
            InternalSlots::None | InternalSlots::Server(_) => {}
            InternalSlots::WeakMap(_) | InternalSlots::WeakSet(_) => {}
        }
    }
    {
        // Weak payloads need a mutable borrow for compaction.
        let mut borrowed = obj.borrow_mut();
        match borrowed.slots_mut() {
            InternalSlots::WeakMap(map) => {
                let pairs: Vec<Json> = map
                    .iter_live()
                    .into_iter()
                    .map(|(k, v)| {
                        Ok(Json::Array(vec![
                            encode_value(&Value::Object(k), ids)?,
                            encode_value(&v, ids)?,
                        ]))
                    })
                    .collect::<EngineResult<_>>()?;
                rec.insert("entries".into(), Json::Array(pairs));
            }
            InternalSlots::WeakSet(set) => {
                let data: Vec<Json> = set
                    .iter_live()
                    .into_iter()
                    .map(|m| encode_value(&Value::Object(m), ids))
                    .collect::<Result<_, _>>()?;
                rec.insert("data".into(), Json::Array(data));
            }
            _ => {}
        }
    }

    // Properties with their attribute companion lists.
    {
        let borrowed = obj.borrow();
        let pruned = prune_list(class);
        let mut props = JsonMap::new();
        let mut non_writable = Vec::new();
        let mut non_enumerable = Vec::new();
        let mut non_configurable = Vec::new();
        for (key, prop) in borrowed.props() {
            if pruned.contains(&key) {
                continue;
            }
            props.insert(key.to_string(), encode_value(&prop.value, ids)?);
            if !prop.attrs.contains(PropertyAttrs::WRITABLE) {
                non_writable.push(key.to_string());
            }
            if !prop.attrs.contains(PropertyAttrs::ENUMERABLE) {
                non_enumerable.push(key.to_string());
            }
            if !prop.attrs.contains(PropertyAttrs::CONFIGURABLE) {
                non_configurable.push(key.to_string());
            }
        }
        if !props.is_empty() {
            rec.insert("props".into(), Json::Object(props));
        }
        if !non_writable.is_empty() {
            rec.insert("nonWritable".into(), json!(non_writable));
        }
        if !non_enumerable.is_empty() {
            rec.insert("nonEnumerable".into(), json!(non_enumerable));
        }
        if !non_configurable.is_empty() {
            rec.insert("nonConfigurable".into(), json!(non_configurable));
        }
        if !borrowed.is_extensible() {
            rec.insert("isExtensible".into(), Json::Bool(false));
        }
    }

    Ok(Json::Object(rec))
}
