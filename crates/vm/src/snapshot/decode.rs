//! Snapshot decoder.
//!
//! Decoding happens entirely off to the side: pass one allocates a stub per
//! record (resolving native-function ids against the live table), pass two
//! populates prototypes, properties, collections, scopes, states, and
//! threads, and only a fully validated world is handed back for
//! installation. Any error leaves the interpreter exactly as it was.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value as Json;

use burrow_ast::{AstArena, NodeIx};

use crate::error::DecodeError;
use crate::heap::{ObjRef, Registry};
use crate::interp::{Builtins, Interpreter, ERROR_CLASSES};
use crate::object::{
    self, ClassTag, FunctionSlots, InternalSlots, Property, PropertyAttrs, PsObject,
};
use crate::scope::{ScopePolicy, ScopeRef};
use crate::step::{State, StateArena, StateIx};
use crate::thread::{Abrupt, Blocker, Thread, ThreadId, ThreadStatus};
use crate::value::Value;

use super::SNAPSHOT_VERSION;

/// Fully decoded world, ready to install.
pub(crate) struct RestoredWorld {
    pub ast: AstArena,
    pub states: StateArena,
    pub threads: IndexMap<u64, Thread>,
    pub runnable: Vec<ThreadId>,
    pub global_scope: ScopeRef,
    pub registry: Registry,
    pub builtins: Builtins,
    pub next_thread_id: u64,
    pub scope_policy: ScopePolicy,
}

enum Slot {
    Interp,
    Ast,
    Registry,
    Obj(ObjRef),
    Scope(ScopeRef),
    State(StateIx),
    Thread(usize),
}

pub(super) fn decode_world(
    interp: &Interpreter,
    records: &[Json],
) -> Result<RestoredWorld, DecodeError> {
    let mut decoder = Decoder::new(interp, records)?;
    decoder.pass_stubs()?;
    decoder.finish()
}

struct Decoder<'a> {
    interp: &'a Interpreter,
    records: &'a [Json],
    slots: Vec<Slot>,
    states: StateArena,
    threads: Vec<Option<Thread>>,
    ast: Option<AstArena>,
    placeholder_scope: ScopeRef,
}

impl<'a> Decoder<'a> {
    fn new(interp: &'a Interpreter, records: &'a [Json]) -> Result<Self, DecodeError> {
        if records.is_empty() {
            return Err(DecodeError::shape("empty record array"));
        }
        let first = type_tag(&records[0])?;
        if first != "Interpreter" {
            return Err(DecodeError::shape(format!(
                "record 0 is {first}, expected Interpreter"
            )));
        }
        Ok(Self {
            interp,
            records,
            slots: Vec::with_capacity(records.len()),
            states: StateArena::new(),
            threads: Vec::new(),
            ast: None,
            placeholder_scope: ScopeRef::new_global(Value::Undefined),
        })
    }

    fn pass_stubs(&mut self) -> Result<(), DecodeError> {
        for (i, rec) in self.records.iter().enumerate() {
            let tag = type_tag(rec)?;
            let slot = match tag {
                "Interpreter" => {
                    if i != 0 {
                        return Err(DecodeError::shape(format!(
                            "Interpreter record at index {i}"
                        )));
                    }
                    Slot::Interp
                }
                "Ast" => {
                    if self.ast.is_some() {
                        return Err(DecodeError::shape("duplicate Ast record"));
                    }
                    let arena = rec
                        .get("arena")
                        .cloned()
                        .ok_or_else(|| DecodeError::shape("Ast record missing arena"))?;
                    let arena: AstArena = serde_json::from_value(arena)
                        .map_err(|e| DecodeError::shape(format!("Ast arena: {e}")))?;
                    self.ast = Some(arena);
                    Slot::Ast
                }
                "Registry" => Slot::Registry,
                "Scope" => Slot::Scope(ScopeRef::new_global(Value::Undefined)),
                "State" => {
                    let stub = State::new(NodeIx(0), None, self.placeholder_scope.clone());
                    Slot::State(self.states.alloc(stub))
                }
                "Thread" => {
                    self.threads.push(Some(Thread::new(ThreadId(0), StateIx(0))));
                    Slot::Thread(self.threads.len() - 1)
                }
                "Function" => {
                    let obj = match rec.get("id") {
                        Some(id) => {
                            let id = id.as_str().ok_or_else(|| {
                                DecodeError::shape("Function id is not a string")
                            })?;
                            if !self.interp.natives().contains(id) {
                                return Err(DecodeError::MissingNative { id: id.to_string() });
                            }
                            ObjRef::new(PsObject::with_slots(
                                ClassTag::Function,
                                None,
                                InternalSlots::Function(FunctionSlots::Native {
                                    id: id.to_string(),
                                }),
                            ))
                        }
                        None => ObjRef::new(PsObject::new(ClassTag::Function, None)),
                    };
                    Slot::Obj(obj)
                }
                other => match object_class(other) {
                    Some(class) => Slot::Obj(ObjRef::new(PsObject::new(class, None))),
                    None => {
                        return Err(DecodeError::UnknownType {
                            tag: other.to_string(),
                        })
                    }
                },
            };
            self.slots.push(slot);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<RestoredWorld, DecodeError> {
        let root = self.records[0]
            .as_object()
            .ok_or_else(|| DecodeError::shape("record 0 is not an object"))?
            .clone();

        let version = root
            .get("version")
            .and_then(Json::as_u64)
            .ok_or_else(|| DecodeError::shape("record 0 missing version"))?;
        if version > SNAPSHOT_VERSION {
            return Err(DecodeError::UnsupportedVersion { version });
        }

        // Wire record 0 before populating: the default prototypes are
        // needed while objects decode.
        let protos = root
            .get("protos")
            .and_then(Json::as_object)
            .cloned()
            .ok_or_else(|| DecodeError::shape("record 0 missing protos"))?;
        let proto = |this: &Self, name: &str| -> Result<ObjRef, DecodeError> {
            let json = protos
                .get(name)
                .ok_or_else(|| DecodeError::shape(format!("protos missing {name}")))?;
            this.obj_at(this.ref_index(json)?)
        };
        let error_proto = proto(&self, "error")?;
        let mut error_protos = IndexMap::new();
        for name in ERROR_CLASSES {
            error_protos.insert(name.to_string(), error_proto.clone());
        }
        let builtins = Builtins {
            global: proto(&self, "global")?,
            object_proto: proto(&self, "object")?,
            function_proto: proto(&self, "function")?,
            array_proto: proto(&self, "array")?,
            string_proto: proto(&self, "string")?,
            number_proto: proto(&self, "number")?,
            boolean_proto: proto(&self, "boolean")?,
            date_proto: proto(&self, "date")?,
            regexp_proto: proto(&self, "regexp")?,
            map_proto: proto(&self, "map")?,
            set_proto: proto(&self, "set")?,
            weakmap_proto: proto(&self, "weakmap")?,
            weakset_proto: proto(&self, "weakset")?,
            thread_proto: proto(&self, "thread")?,
            server_proto: proto(&self, "server")?,
            error_proto,
            error_protos,
        };

        let global_scope = {
            let json = root
                .get("globalScope")
                .ok_or_else(|| DecodeError::shape("record 0 missing globalScope"))?;
            self.scope_at(self.ref_index(json)?)?
        };

        let ast_index = {
            let json = root
                .get("ast")
                .ok_or_else(|| DecodeError::shape("record 0 missing ast"))?;
            self.ref_index(json)?
        };
        if !matches!(self.slots[ast_index], Slot::Ast) {
            return Err(DecodeError::RefType {
                index: ast_index,
                expected: "Ast",
            });
        }

        let registry_index = {
            let json = root
                .get("registry")
                .ok_or_else(|| DecodeError::shape("record 0 missing registry"))?;
            self.ref_index(json)?
        };
        if !matches!(self.slots[registry_index], Slot::Registry) {
            return Err(DecodeError::RefType {
                index: registry_index,
                expected: "Registry",
            });
        }

        // Pass two: populate every record.
        enum Target {
            Obj(ObjRef),
            Scope(ScopeRef),
            State(StateIx),
            Thread(usize),
            Registry,
            Skip,
        }
        let records = self.records;
        let mut registry = Registry::new();
        for (i, rec) in records.iter().enumerate() {
            let target = match &self.slots[i] {
                Slot::Obj(obj) => Target::Obj(obj.clone()),
                Slot::Scope(scope) => Target::Scope(scope.clone()),
                Slot::State(ix) => Target::State(*ix),
                Slot::Thread(pos) => Target::Thread(*pos),
                Slot::Registry => Target::Registry,
                Slot::Interp | Slot::Ast => Target::Skip,
            };
            match target {
                Target::Obj(obj) => self.populate_object(i, rec, &obj, &builtins)?,
                Target::Scope(scope) => self.populate_scope(rec, &scope)?,
                Target::State(ix) => self.populate_state(rec, ix)?,
                Target::Thread(pos) => {
                    let thread = self.populate_thread(rec)?;
                    self.threads[pos] = Some(thread);
                }
                Target::Registry => {
                    let entries = rec
                        .get("entries")
                        .and_then(Json::as_object)
                        .ok_or_else(|| DecodeError::shape("Registry record missing entries"))?;
                    for (name, json) in entries {
                        if json.is_null() {
                            continue;
                        }
                        registry.register(name.clone(), self.obj_at(self.ref_index(json)?)?);
                    }
                }
                Target::Skip => {}
            }
        }

        self.check_consistency()?;

        // Threads assemble in record-0 order; stragglers keep record order.
        let mut threads: IndexMap<u64, Thread> = IndexMap::new();
        let thread_list = root
            .get("threads")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();
        for json in &thread_list {
            let index = self.ref_index(json)?;
            let pos = match self.slots.get(index) {
                Some(Slot::Thread(pos)) => *pos,
                _ => {
                    return Err(DecodeError::RefType {
                        index,
                        expected: "Thread",
                    })
                }
            };
            if let Some(thread) = self.threads[pos].take() {
                if threads.insert(thread.id.0, thread).is_some() {
                    return Err(DecodeError::shape("duplicate thread id"));
                }
            }
        }
        for pos in 0..self.threads.len() {
            if let Some(thread) = self.threads[pos].take() {
                if threads.insert(thread.id.0, thread).is_some() {
                    return Err(DecodeError::shape("duplicate thread id"));
                }
            }
        }

        let mut runnable = Vec::new();
        if let Some(list) = root.get("runnable").and_then(Json::as_array) {
            for json in list {
                let id = json
                    .as_u64()
                    .ok_or_else(|| DecodeError::shape("runnable entry is not a thread id"))?;
                if !threads.contains_key(&id) {
                    return Err(DecodeError::shape(format!(
                        "runnable references unknown thread {id}"
                    )));
                }
                runnable.push(ThreadId(id));
            }
        }

        let max_id = threads.keys().copied().max().unwrap_or(0);
        let next_thread_id = root
            .get("nextThreadId")
            .and_then(Json::as_u64)
            .unwrap_or(0)
            .max(max_id + 1);

        let scope_policy = match root.get("policy").and_then(Json::as_str) {
            None | Some("throw") => ScopePolicy::Throw,
            Some("createOnGlobal") => ScopePolicy::CreateOnGlobal,
            Some(other) => {
                return Err(DecodeError::shape(format!("unknown scope policy {other}")))
            }
        };

        Ok(RestoredWorld {
            ast: self
                .ast
                .take()
                .ok_or_else(|| DecodeError::shape("snapshot has no Ast record"))?,
            states: self.states,
            threads,
            runnable,
            global_scope,
            registry,
            builtins,
            next_thread_id,
            scope_policy,
        })
    }

    // --- population ------------------------------------------------------

    fn populate_object(
        &self,
        index: usize,
        rec: &Json,
        obj: &ObjRef,
        builtins: &Builtins,
    ) -> Result<(), DecodeError> {
        let class = obj.borrow().class();

        let proto = match rec.get("proto") {
            None => Some(builtins.default_proto(class)),
            Some(Json::Null) => None,
            Some(json) => Some(self.obj_at(self.ref_index(json)?)?),
        };
        obj.borrow_mut().set_proto_unchecked(proto);

        match class {
            ClassTag::Function => {
                if rec.get("id").is_none() {
                    let params = rec
                        .get("params")
                        .and_then(Json::as_array)
                        .ok_or_else(|| DecodeError::shape("Function record missing params"))?
                        .iter()
                        .map(|p| {
                            p.as_str().map(str::to_string).ok_or_else(|| {
                                DecodeError::shape("Function param is not a string")
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let body = rec
                        .get("body")
                        .and_then(Json::as_u64)
                        .ok_or_else(|| DecodeError::shape("Function record missing body"))?;
                    self.check_node(body)?;
                    let scope = {
                        let json = rec
                            .get("scope")
                            .ok_or_else(|| DecodeError::shape("Function record missing scope"))?;
                        self.scope_at(self.ref_index(json)?)?
                    };
                    let name = rec
                        .get("name")
                        .and_then(Json::as_str)
                        .map(str::to_string);
                    obj.borrow_mut()
                        .set_slots(InternalSlots::Function(FunctionSlots::Declared {
                            params,
                            body: NodeIx(body as u32),
                            scope,
                            name,
                        }));
                }
            }
            ClassTag::Date => {
                let data = rec
                    .get("data")
                    .and_then(Json::as_str)
                    .ok_or_else(|| DecodeError::shape("Date record missing data"))?;
                let ms = object::parse_date_iso(data).ok_or_else(|| DecodeError::InvalidDate {
                    data: data.to_string(),
                })?;
                obj.borrow_mut().set_slots(InternalSlots::Date(ms));
            }
            ClassTag::RegExp => {
                let source = rec
                    .get("source")
                    .and_then(Json::as_str)
                    .ok_or_else(|| DecodeError::shape("RegExp record missing source"))?;
                let flags = rec.get("flags").and_then(Json::as_str).unwrap_or("");
                obj.borrow_mut().set_slots(InternalSlots::RegExp {
                    source: source.to_string(),
                    flags: flags.to_string(),
                });
            }
            ClassTag::Map => {
                let mut decoded = Vec::new();
                for pair in entry_pairs(rec)? {
                    decoded.push((self.decode_value(&pair.0)?, self.decode_value(&pair.1)?));
                }
                obj.borrow_mut().set_slots(InternalSlots::Map(decoded));
            }
            ClassTag::Set => {
                let mut decoded = Vec::new();
                for json in data_items(rec)? {
                    decoded.push(self.decode_value(&json)?);
                }
                obj.borrow_mut().set_slots(InternalSlots::Set(decoded));
            }
            ClassTag::WeakMap => {
                let mut map = crate::weak::IterableWeakMap::new();
                for pair in entry_pairs(rec)? {
                    let key = self.decode_value(&pair.0)?;
                    let key = key.as_object().ok_or_else(|| {
                        DecodeError::shape("weak map key is not an object")
                    })?;
                    map.set(key, self.decode_value(&pair.1)?);
                }
                obj.borrow_mut().set_slots(InternalSlots::WeakMap(map));
            }
            ClassTag::WeakSet => {
                let mut set = crate::weak::IterableWeakSet::new();
                for json in data_items(rec)? {
                    let member = self.decode_value(&json)?;
                    let member = member.as_object().ok_or_else(|| {
                        DecodeError::shape("weak set member is not an object")
                    })?;
                    set.add(member);
                }
                obj.borrow_mut().set_slots(InternalSlots::WeakSet(set));
            }
            ClassTag::Thread => {
                let id = rec
                    .get("thread")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| DecodeError::shape("ThreadHandle record missing thread"))?;
                obj.borrow_mut().set_slots(InternalSlots::Thread(id));
            }
            _ => {}
        }

        if let Some(props) = rec.get("props") {
            let props = props
                .as_object()
                .ok_or_else(|| DecodeError::shape(format!("record {index} props not a map")))?;
            let non_writable = name_set(rec, "nonWritable")?;
            let non_enumerable = name_set(rec, "nonEnumerable")?;
            let non_configurable = name_set(rec, "nonConfigurable")?;
            let mut borrowed = obj.borrow_mut();
            for (key, json) in props {
                let mut attrs = PropertyAttrs::all();
                if non_writable.contains(key.as_str()) {
                    attrs -= PropertyAttrs::WRITABLE;
                }
                if non_enumerable.contains(key.as_str()) {
                    attrs -= PropertyAttrs::ENUMERABLE;
                }
                if non_configurable.contains(key.as_str()) {
                    attrs -= PropertyAttrs::CONFIGURABLE;
                }
                borrowed.install_prop(
                    key,
                    Property {
                        value: self.decode_value(json)?,
                        attrs,
                    },
                );
            }
        }
        if rec.get("isExtensible") == Some(&Json::Bool(false)) {
            obj.borrow_mut().prevent_extensions();
        }
        Ok(())
    }

    fn populate_scope(&self, rec: &Json, scope: &ScopeRef) -> Result<(), DecodeError> {
        match rec.get("parent") {
            None | Some(Json::Null) => scope.set_parent(None),
            Some(json) => scope.set_parent(Some(self.scope_at(self.ref_index(json)?)?)),
        }
        let this = match rec.get("this") {
            Some(json) => self.decode_value(json)?,
            None => Value::Undefined,
        };
        scope.set_this(this);
        if let Some(vars) = rec.get("vars") {
            let vars = vars
                .as_object()
                .ok_or_else(|| DecodeError::shape("Scope vars not a map"))?;
            for (name, json) in vars {
                scope.declare_set(name.clone(), self.decode_value(json)?);
            }
        }
        Ok(())
    }

    fn populate_state(&mut self, rec: &Json, ix: StateIx) -> Result<(), DecodeError> {
        let node = rec
            .get("node")
            .and_then(Json::as_u64)
            .ok_or_else(|| DecodeError::shape("State record missing node"))?;
        self.check_node(node)?;
        let parent = match rec.get("parent") {
            None | Some(Json::Null) => None,
            Some(json) => Some(self.state_at(self.ref_index(json)?)?),
        };
        let scope = {
            let json = rec
                .get("scope")
                .ok_or_else(|| DecodeError::shape("State record missing scope"))?;
            self.scope_at(self.ref_index(json)?)?
        };
        let values = match rec.get("values").and_then(Json::as_array) {
            Some(list) => list
                .iter()
                .map(|v| self.decode_value(v))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let keys = match rec.get("keys").and_then(Json::as_array) {
            Some(list) => list
                .iter()
                .map(|k| {
                    k.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| DecodeError::shape("State key is not a string"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let saved = match rec.get("saved") {
            Some(json) => Some(self.decode_abrupt(json)?),
            None => None,
        };

        let state = self
            .states
            .get_mut(ix)
            .map_err(|_| DecodeError::shape("state stub vanished"))?;
        state.node = NodeIx(node as u32);
        state.parent = parent;
        state.scope = scope;
        state.phase = rec.get("phase").and_then(Json::as_u64).unwrap_or(0) as u8;
        state.index = rec.get("index").and_then(Json::as_u64).unwrap_or(0) as u32;
        state.aux = rec.get("aux").and_then(Json::as_u64).unwrap_or(0) as u32;
        state.values = values;
        state.keys = keys;
        state.label = rec.get("label").and_then(Json::as_str).map(str::to_string);
        state.saved = saved;
        Ok(())
    }

    fn populate_thread(&self, rec: &Json) -> Result<Thread, DecodeError> {
        let id = rec
            .get("id")
            .and_then(Json::as_u64)
            .ok_or_else(|| DecodeError::shape("Thread record missing id"))?;
        let status = rec
            .get("status")
            .and_then(Json::as_str)
            .and_then(ThreadStatus::from_name)
            .ok_or_else(|| DecodeError::shape("Thread record missing status"))?;
        let current = match rec.get("state") {
            None | Some(Json::Null) => None,
            Some(json) => Some(self.state_at(self.ref_index(json)?)?),
        };
        let blocker = match rec.get("blocker") {
            None => None,
            Some(json) => Some(decode_blocker(json)?),
        };
        let pending = match rec.get("pending") {
            None => None,
            Some(json) => Some(self.decode_abrupt(json)?),
        };
        let result = match rec.get("result") {
            Some(json) => self.decode_value(json)?,
            None => Value::Undefined,
        };

        Ok(Thread {
            id: ThreadId(id),
            status,
            wake_at: rec.get("wakeAt").and_then(Json::as_u64),
            blocker,
            current,
            pending,
            result,
            uncaught: None,
            killed: false,
            call_depth: rec.get("callDepth").and_then(Json::as_u64).unwrap_or(0) as u32,
        })
    }

    // --- validation ------------------------------------------------------

    fn check_node(&self, node: u64) -> Result<(), DecodeError> {
        let len = self.ast.as_ref().map(AstArena::len).unwrap_or(0);
        if node as usize >= len {
            return Err(DecodeError::shape(format!(
                "node index {node} outside the decoded arena"
            )));
        }
        Ok(())
    }

    /// Class-tag/slot consistency plus prototype-cycle detection.
    fn check_consistency(&self) -> Result<(), DecodeError> {
        for (i, slot) in self.slots.iter().enumerate() {
            let Slot::Obj(obj) = slot else { continue };
            {
                let borrowed = obj.borrow();
                let consistent = match (borrowed.class(), borrowed.slots()) {
                    (ClassTag::Function, InternalSlots::Function(_)) => true,
                    (ClassTag::Date, InternalSlots::Date(_)) => true,
                    (ClassTag::RegExp, InternalSlots::RegExp { .. }) => true,
                    (ClassTag::Map, InternalSlots::Map(_)) => true,
                    (ClassTag::Set, InternalSlots::Set(_)) => true,
                    (ClassTag::WeakMap, InternalSlots::WeakMap(_)) => true,
                    (ClassTag::WeakSet, InternalSlots::WeakSet(_)) => true,
                    (ClassTag::Thread, InternalSlots::Thread(_)) => true,
                    (
                        ClassTag::Object
                        | ClassTag::Array
                        | ClassTag::Error
                        | ClassTag::Arguments
                        | ClassTag::Box,
                        InternalSlots::None,
                    ) => true,
                    _ => false,
                };
                if !consistent {
                    return Err(DecodeError::shape(format!(
                        "record {i} slot payload does not match its class"
                    )));
                }
            }
            let mut steps = 0usize;
            let mut cursor = obj.borrow().proto();
            while let Some(next) = cursor {
                steps += 1;
                if steps > self.slots.len() + 1 {
                    return Err(DecodeError::PrototypeCycle { index: i });
                }
                cursor = next.borrow().proto();
            }
        }
        Ok(())
    }

    // --- reference plumbing ----------------------------------------------

    fn ref_index(&self, json: &Json) -> Result<usize, DecodeError> {
        let n = json
            .get("#")
            .and_then(Json::as_u64)
            .ok_or_else(|| DecodeError::shape("reference is not {\"#\": n}"))?;
        let n = n as usize;
        if n >= self.records.len() {
            return Err(DecodeError::DanglingReference { index: n });
        }
        Ok(n)
    }

    fn obj_at(&self, index: usize) -> Result<ObjRef, DecodeError> {
        match &self.slots[index] {
            Slot::Obj(obj) => Ok(obj.clone()),
            _ => Err(DecodeError::RefType {
                index,
                expected: "object",
            }),
        }
    }

    fn scope_at(&self, index: usize) -> Result<ScopeRef, DecodeError> {
        match &self.slots[index] {
            Slot::Scope(scope) => Ok(scope.clone()),
            _ => Err(DecodeError::RefType {
                index,
                expected: "Scope",
            }),
        }
    }

    fn state_at(&self, index: usize) -> Result<StateIx, DecodeError> {
        match &self.slots[index] {
            Slot::State(ix) => Ok(*ix),
            _ => Err(DecodeError::RefType {
                index,
                expected: "State",
            }),
        }
    }

    fn decode_value(&self, json: &Json) -> Result<Value, DecodeError> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Object(map) => {
                if let Some(tag) = map.get("Value").and_then(Json::as_str) {
                    if tag == "undefined" {
                        return Ok(Value::Undefined);
                    }
                    return Err(DecodeError::shape(format!("unknown value tag {tag}")));
                }
                if let Some(tag) = map.get("Number").and_then(Json::as_str) {
                    return Ok(Value::Number(match tag {
                        "NaN" => f64::NAN,
                        "Infinity" => f64::INFINITY,
                        "-Infinity" => f64::NEG_INFINITY,
                        "-0" => -0.0,
                        other => {
                            return Err(DecodeError::shape(format!(
                                "unknown number tag {other}"
                            )))
                        }
                    }));
                }
                if map.contains_key("#") {
                    return Ok(Value::Object(self.obj_at(self.ref_index(json)?)?));
                }
                return Err(DecodeError::shape("unrecognized value shape"));
            }
            Json::Array(_) => return Err(DecodeError::shape("array is not a value")),
        })
    }

    fn decode_abrupt(&self, json: &Json) -> Result<Abrupt, DecodeError> {
        let kind = json
            .get("kind")
            .and_then(Json::as_str)
            .ok_or_else(|| DecodeError::shape("abrupt completion missing kind"))?;
        let label = json.get("label").and_then(Json::as_str).map(str::to_string);
        Ok(match kind {
            "break" => Abrupt::Break(label),
            "continue" => Abrupt::Continue(label),
            "return" => Abrupt::Return(match json.get("value") {
                Some(v) => self.decode_value(v)?,
                None => Value::Undefined,
            }),
            "throw" => Abrupt::Throw(match json.get("value") {
                Some(v) => self.decode_value(v)?,
                None => Value::Undefined,
            }),
            other => return Err(DecodeError::shape(format!("unknown abrupt kind {other}"))),
        })
    }
}

fn type_tag(rec: &Json) -> Result<&str, DecodeError> {
    rec.get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| DecodeError::shape("record has no type tag"))
}

fn object_class(tag: &str) -> Option<ClassTag> {
    Some(match tag {
        "Object" => ClassTag::Object,
        "Array" => ClassTag::Array,
        "Date" => ClassTag::Date,
        "RegExp" => ClassTag::RegExp,
        "Error" => ClassTag::Error,
        "Arguments" => ClassTag::Arguments,
        "Map" => ClassTag::Map,
        "Set" => ClassTag::Set,
        "IterableWeakMap" => ClassTag::WeakMap,
        "IterableWeakSet" => ClassTag::WeakSet,
        "ThreadHandle" => ClassTag::Thread,
        "Box" => ClassTag::Box,
        _ => return None,
    })
}

fn entry_pairs(rec: &Json) -> Result<Vec<(Json, Json)>, DecodeError> {
    let entries = rec
        .get("entries")
        .and_then(Json::as_array)
        .ok_or_else(|| DecodeError::shape("record missing entries"))?;
    entries
        .iter()
        .map(|pair| {
            let pair = pair
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| DecodeError::shape("entry is not a pair"))?;
            Ok((pair[0].clone(), pair[1].clone()))
        })
        .collect()
}

fn data_items(rec: &Json) -> Result<Vec<Json>, DecodeError> {
    Ok(rec
        .get("data")
        .and_then(Json::as_array)
        .ok_or_else(|| DecodeError::shape("record missing data"))?
        .clone())
}

fn name_set<'j>(rec: &'j Json, field: &str) -> Result<HashSet<&'j str>, DecodeError> {
    match rec.get(field) {
        None => Ok(HashSet::new()),
        Some(json) => json
            .as_array()
            .ok_or_else(|| DecodeError::shape(format!("{field} is not an array")))?
            .iter()
            .map(|n| {
                n.as_str()
                    .ok_or_else(|| DecodeError::shape(format!("{field} entry is not a string")))
            })
            .collect(),
    }
}

fn decode_blocker(json: &Json) -> Result<Blocker, DecodeError> {
    if let Some(handle) = json.get("handle").and_then(Json::as_u64) {
        return Ok(Blocker::Handle(handle));
    }
    if let Some(name) = json.get("named").and_then(Json::as_str) {
        return Ok(Blocker::Named(name.to_string()));
    }
    Err(DecodeError::shape("unrecognized blocker"))
}
