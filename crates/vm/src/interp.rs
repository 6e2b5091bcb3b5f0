//! The interpreter root: pseudo-heap singletons, threads, scheduler loop,
//! and the host boundary.
//!
//! One `Interpreter` is one world. Hosts construct it, register extra
//! natives, load programs, spawn threads, and drive `run` from their event
//! loop; `snapshot`/`restore` checkpoint the whole thing between runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

use burrow_ast::{AstArena, NodeIx, NodeKind};

use crate::error::{DecodeError, EngineError, EngineResult};
use crate::heap::{ObjRef, Registry};
use crate::host::{Clock, MonotonicClock};
use crate::natives::NativeRegistry;
use crate::object::{
    ClassTag, FunctionSlots, InternalSlots, Property, PropertyAttrs, PsObject,
};
use crate::scheduler::Scheduler;
use crate::scope::{populate_scope, ScopePolicy, ScopeRef};
use crate::step::{self, State, StateArena, StateIx};
use crate::thread::{Blocker, Thread, ThreadId, ThreadStatus};
use crate::value::Value;

/// Error classes every world carries.
pub const ERROR_CLASSES: [&str; 8] = [
    "Error",
    "TypeError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "URIError",
    "EvalError",
    "PermissionError",
];

/// Restrictions on one interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Steps one thread may take per scheduler slice
    pub step_budget: u32,
    /// Maximum nested user-function frames per thread
    pub max_call_depth: usize,
    /// Maximum live states across all threads
    pub max_states: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            step_budget: 1_000,
            max_call_depth: 256,
            max_states: 1_000_000,
        }
    }
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Every thread has finished
    Done,
    /// Only sleeping or blocked threads remain
    Idle,
    /// The step budget ran out with work left
    Budget,
}

/// Result of a thread that has been reaped.
#[derive(Debug, Clone)]
pub struct FinishedThread {
    /// Completion value of the thread's last expression
    pub result: Value,
    /// Uncaught user error, when the thread died on one
    pub uncaught: Option<Value>,
}

/// The world's built-in singletons.
///
/// These exist before any program runs and before any snapshot decodes;
/// the decoder rebinds them from record 0 rather than fabricating them.
#[derive(Debug)]
pub struct Builtins {
    /// The global object (`this` at top level)
    pub global: ObjRef,
    pub object_proto: ObjRef,
    pub function_proto: ObjRef,
    pub array_proto: ObjRef,
    pub string_proto: ObjRef,
    pub number_proto: ObjRef,
    pub boolean_proto: ObjRef,
    pub date_proto: ObjRef,
    pub regexp_proto: ObjRef,
    pub error_proto: ObjRef,
    pub map_proto: ObjRef,
    pub set_proto: ObjRef,
    pub weakmap_proto: ObjRef,
    pub weakset_proto: ObjRef,
    pub thread_proto: ObjRef,
    pub server_proto: ObjRef,
    /// Prototypes of the error classes, `Error` included
    pub error_protos: IndexMap<String, ObjRef>,
}

impl Builtins {
    /// Allocates the singleton graph for a fresh world.
    pub fn bootstrap() -> Self {
        let object_proto = ObjRef::new(PsObject::new(ClassTag::Object, None));
        let child = |class| ObjRef::new(PsObject::new(class, Some(object_proto.clone())));

        let error_proto = child(ClassTag::Object);
        let mut error_protos = IndexMap::new();
        error_protos.insert("Error".to_string(), error_proto.clone());
        for name in &ERROR_CLASSES[1..] {
            error_protos.insert(
                name.to_string(),
                ObjRef::new(PsObject::new(ClassTag::Object, Some(error_proto.clone()))),
            );
        }

        Self {
            global: child(ClassTag::Object),
            function_proto: child(ClassTag::Object),
            array_proto: child(ClassTag::Object),
            string_proto: child(ClassTag::Object),
            number_proto: child(ClassTag::Object),
            boolean_proto: child(ClassTag::Object),
            date_proto: child(ClassTag::Object),
            regexp_proto: child(ClassTag::Object),
            map_proto: child(ClassTag::Object),
            set_proto: child(ClassTag::Object),
            weakmap_proto: child(ClassTag::Object),
            weakset_proto: child(ClassTag::Object),
            thread_proto: child(ClassTag::Object),
            server_proto: child(ClassTag::Object),
            error_proto,
            error_protos,
            object_proto,
        }
    }

    /// Default prototype for a class (`proto` omitted in records).
    pub fn default_proto(&self, class: ClassTag) -> ObjRef {
        match class {
            ClassTag::Object | ClassTag::Arguments | ClassTag::Box => self.object_proto.clone(),
            ClassTag::Function => self.function_proto.clone(),
            ClassTag::Array => self.array_proto.clone(),
            ClassTag::Date => self.date_proto.clone(),
            ClassTag::RegExp => self.regexp_proto.clone(),
            ClassTag::Error => self.error_proto.clone(),
            ClassTag::Map => self.map_proto.clone(),
            ClassTag::Set => self.set_proto.clone(),
            ClassTag::WeakMap => self.weakmap_proto.clone(),
            ClassTag::WeakSet => self.weakset_proto.clone(),
            ClassTag::Thread => self.thread_proto.clone(),
            ClassTag::Server => self.server_proto.clone(),
        }
    }

    /// Named prototype table for record 0.
    pub fn proto_entries(&self) -> Vec<(&'static str, ObjRef)> {
        vec![
            ("object", self.object_proto.clone()),
            ("function", self.function_proto.clone()),
            ("array", self.array_proto.clone()),
            ("string", self.string_proto.clone()),
            ("number", self.number_proto.clone()),
            ("boolean", self.boolean_proto.clone()),
            ("date", self.date_proto.clone()),
            ("regexp", self.regexp_proto.clone()),
            ("error", self.error_proto.clone()),
            ("map", self.map_proto.clone()),
            ("set", self.set_proto.clone()),
            ("weakmap", self.weakmap_proto.clone()),
            ("weakset", self.weakset_proto.clone()),
            ("thread", self.thread_proto.clone()),
            ("server", self.server_proto.clone()),
            ("global", self.global.clone()),
        ]
    }
}

/// A running world.
pub struct Interpreter {
    ast: AstArena,
    states: StateArena,
    threads: IndexMap<u64, Thread>,
    finished: HashMap<u64, FinishedThread>,
    scheduler: Scheduler,
    registry: Registry,
    natives: NativeRegistry,
    builtins: Builtins,
    global_scope: ScopeRef,
    scope_policy: ScopePolicy,
    limits: EngineLimits,
    clock: Box<dyn Clock>,
    next_thread_id: u64,
}

impl Interpreter {
    /// Creates a world with the default monotonic clock.
    pub fn new() -> EngineResult<Self> {
        Self::with_clock(Box::new(MonotonicClock::new()))
    }

    /// Creates a world with a host-provided clock.
    pub fn with_clock(clock: Box<dyn Clock>) -> EngineResult<Self> {
        let builtins = Builtins::bootstrap();
        let global_scope = ScopeRef::new_global(Value::Object(builtins.global.clone()));
        let mut interp = Self {
            ast: AstArena::new(),
            states: StateArena::new(),
            threads: IndexMap::new(),
            finished: HashMap::new(),
            scheduler: Scheduler::new(),
            registry: Registry::new(),
            natives: NativeRegistry::new(),
            builtins,
            global_scope,
            scope_policy: ScopePolicy::default(),
            limits: EngineLimits::default(),
            clock,
            next_thread_id: 1,
        };
        crate::globals::install(&mut interp)?;
        interp
            .registry
            .register("global", interp.builtins.global.clone());
        Ok(interp)
    }

    // --- accessors -------------------------------------------------------

    /// The loaded program arena.
    pub fn ast(&self) -> &AstArena {
        &self.ast
    }

    /// The live continuation arena.
    pub fn states(&self) -> &StateArena {
        &self.states
    }

    pub(crate) fn states_mut(&mut self) -> &mut StateArena {
        &mut self.states
    }

    /// The built-in singleton table.
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// The native-function table.
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// The native-function table, for host registration before execution.
    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// The named-singleton registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The named-singleton registry, mutable.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// The global scope.
    pub fn global_scope(&self) -> &ScopeRef {
        &self.global_scope
    }

    /// The engine limits.
    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// Replaces the engine limits.
    pub fn set_limits(&mut self, limits: EngineLimits) {
        self.limits = limits;
    }

    /// The unresolved-assignment policy.
    pub fn scope_policy(&self) -> ScopePolicy {
        self.scope_policy
    }

    /// Selects the unresolved-assignment policy.
    pub fn set_scope_policy(&mut self, policy: ScopePolicy) {
        self.scope_policy = policy;
    }

    /// Current clock reading in milliseconds.
    pub fn clock_now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Live threads in spawn order.
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    /// Looks up a live thread.
    pub fn thread(&self, tid: ThreadId) -> EngineResult<&Thread> {
        self.threads
            .get(&tid.0)
            .ok_or(EngineError::NoSuchThread { id: tid.0 })
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> EngineResult<&mut Thread> {
        self.threads
            .get_mut(&tid.0)
            .ok_or(EngineError::NoSuchThread { id: tid.0 })
    }

    /// Completion value of a thread, live or reaped.
    pub fn thread_result(&self, tid: ThreadId) -> Option<Value> {
        if let Some(thread) = self.threads.get(&tid.0) {
            return Some(thread.result.clone());
        }
        self.finished.get(&tid.0).map(|f| f.result.clone())
    }

    /// Uncaught error of a reaped or live thread, if any.
    pub fn thread_uncaught(&self, tid: ThreadId) -> Option<Value> {
        if let Some(thread) = self.threads.get(&tid.0) {
            return thread.uncaught.clone();
        }
        self.finished.get(&tid.0).and_then(|f| f.uncaught.clone())
    }

    /// Returns true while the thread has work left.
    pub fn thread_is_live(&self, tid: ThreadId) -> bool {
        self.threads.get(&tid.0).is_some_and(Thread::is_live)
    }

    // --- program loading and spawning ------------------------------------

    /// Loads a parsed program (ESTree JSON from the host parser).
    pub fn load_program(&mut self, json: &Json) -> EngineResult<NodeIx> {
        Ok(self.ast.load_estree(json)?)
    }

    /// Spawns a thread running `program` in the global scope.
    pub fn spawn(&mut self, program: NodeIx) -> EngineResult<ThreadId> {
        match self.ast.get(program).map(|n| &n.kind) {
            Some(NodeKind::Program { .. }) => {}
            Some(other) => {
                return Err(EngineError::invalid_program(format!(
                    "spawn target is {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(EngineError::invalid_program(format!(
                    "node {} out of range",
                    program.0
                )))
            }
        }
        self.natives.seal();
        let root = State::new(program, None, self.global_scope.clone());
        let root = self.alloc_state(root)?;
        Ok(self.add_thread(root))
    }

    /// Spawns a thread calling a source-defined function value.
    pub fn spawn_call(
        &mut self,
        func: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> EngineResult<ThreadId> {
        let func_obj = func
            .as_object()
            .filter(|o| o.borrow().class() == ClassTag::Function)
            .cloned()
            .ok_or_else(|| EngineError::unsupported("spawning a non-function"))?;
        let (params, body, scope) = match func_obj.borrow().slots() {
            InternalSlots::Function(FunctionSlots::Declared {
                params,
                body,
                scope,
                ..
            }) => (params.clone(), *body, scope.clone()),
            InternalSlots::Function(FunctionSlots::Native { .. }) => {
                return Err(EngineError::unsupported("spawning a native function"))
            }
            _ => return Err(EngineError::unsupported("spawning a non-function")),
        };
        self.natives.seal();

        let this = match this {
            Value::Undefined | Value::Null => Value::Object(self.builtins.global.clone()),
            bound => bound,
        };
        let fscope = ScopeRef::new_child(&scope, Some(this));
        for (i, param) in params.iter().enumerate() {
            fscope.declare_set(param.clone(), args.get(i).cloned().unwrap_or_default());
        }
        let arguments_obj = self.new_arguments(&args);
        fscope.declare_set("arguments", Value::Object(arguments_obj));
        populate_scope(self, body, &fscope)?;

        let root = State::new(body, None, fscope);
        let root = self.alloc_state(root)?;
        Ok(self.add_thread(root))
    }

    fn add_thread(&mut self, root: StateIx) -> ThreadId {
        let tid = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        self.threads.insert(tid.0, Thread::new(tid, root));
        self.scheduler.enqueue(tid);
        tid
    }

    /// Requests that a thread be discarded at its next scheduling point.
    ///
    /// Finally blocks of a killed thread never run.
    pub fn kill(&mut self, tid: ThreadId) -> EngineResult<()> {
        let thread = self.thread_mut(tid)?;
        if thread.status == ThreadStatus::Done {
            return Ok(());
        }
        thread.killed = true;
        thread.wake_at = None;
        thread.blocker = None;
        thread.status = ThreadStatus::Runnable;
        self.scheduler.remove(tid);
        self.scheduler.enqueue(tid);
        Ok(())
    }

    /// Reports that a host resource became ready, unblocking its waiters.
    pub fn notify_io_ready(&mut self, blocker: &Blocker) {
        for tid in self.scheduler.unblock(blocker) {
            if let Some(thread) = self.threads.get_mut(&tid.0) {
                if thread.status == ThreadStatus::Blocked {
                    thread.status = ThreadStatus::Runnable;
                    thread.blocker = None;
                    self.scheduler.enqueue(tid);
                }
            }
        }
    }

    // --- the scheduler loop ----------------------------------------------

    /// Advances the world by at most one step of one thread.
    pub fn step(&mut self) -> EngineResult<RunState> {
        self.run(1)
    }

    /// Runs until every thread finishes, parks, or `max_steps` is spent.
    pub fn run(&mut self, max_steps: u64) -> EngineResult<RunState> {
        self.natives.seal();
        let mut remaining = max_steps;
        loop {
            self.wake_sleepers();
            let Some(tid) = self.scheduler.pop_runnable() else {
                return Ok(if self.threads.values().any(Thread::is_live) {
                    RunState::Idle
                } else {
                    RunState::Done
                });
            };
            // A self-kill can leave a stale queue entry behind.
            if !self.threads.contains_key(&tid.0) {
                continue;
            }
            if remaining == 0 {
                // Keep the popped thread at the front for the next call.
                self.scheduler.requeue_front(tid);
                return Ok(RunState::Budget);
            }

            let slice = u64::from(self.limits.step_budget).min(remaining);
            let used = self.run_slice(tid, slice)?;
            remaining -= used;
            self.settle_thread(tid);
        }
    }

    fn wake_sleepers(&mut self) {
        let now = self.clock_now();
        for tid in self.scheduler.wake_due(now) {
            if let Some(thread) = self.threads.get_mut(&tid.0) {
                if thread.status == ThreadStatus::Sleeping {
                    thread.status = ThreadStatus::Runnable;
                    thread.wake_at = None;
                    self.scheduler.enqueue(tid);
                }
            }
        }
    }

    /// Advances one thread by at most `budget` steps.
    fn run_slice(&mut self, tid: ThreadId, budget: u64) -> EngineResult<u64> {
        if self.thread(tid)?.killed {
            if let Some(current) = self.thread(tid)?.current {
                step::free_chain(&mut self.states, current);
            }
            let thread = self.thread_mut(tid)?;
            thread.current = None;
            thread.pending = None;
            thread.status = ThreadStatus::Done;
            log::info!("thread {} killed", tid.0);
            return Ok(0);
        }

        let mut used = 0;
        while used < budget {
            let thread = self.thread(tid)?;
            if thread.status != ThreadStatus::Runnable || thread.current.is_none() {
                break;
            }
            match step::step_once(self, tid) {
                Ok(()) => used += 1,
                Err(err) => {
                    // Host-domain failure: the thread dies, the world lives.
                    log::error!("thread {} crashed: {err}", tid.0);
                    if let Some(current) = self.thread(tid)?.current {
                        step::free_chain(&mut self.states, current);
                    }
                    let thread = self.thread_mut(tid)?;
                    thread.current = None;
                    thread.pending = None;
                    thread.status = ThreadStatus::Done;
                    used += 1;
                    break;
                }
            }
        }
        Ok(used)
    }

    /// Re-queues or parks a thread after its slice; reaps it when done.
    fn settle_thread(&mut self, tid: ThreadId) {
        let (status, wake_at, blocker) = match self.threads.get(&tid.0) {
            Some(thread) => (thread.status, thread.wake_at, thread.blocker.clone()),
            None => return,
        };
        match status {
            ThreadStatus::Runnable => self.scheduler.enqueue(tid),
            ThreadStatus::Sleeping => {
                let wake_at = wake_at.unwrap_or_else(|| self.clock_now());
                self.scheduler.park_sleeping(tid, wake_at);
            }
            ThreadStatus::Blocked => {
                if let Some(blocker) = blocker {
                    self.scheduler.park_blocked(tid, blocker);
                }
            }
            ThreadStatus::Done => {
                let thread = self.threads.shift_remove(&tid.0).expect("checked above");
                self.finished.insert(
                    tid.0,
                    FinishedThread {
                        result: thread.result,
                        uncaught: thread.uncaught,
                    },
                );
            }
        }
    }

    // --- snapshotting -----------------------------------------------------

    /// Serializes the whole world to an ordered record array.
    pub fn snapshot(&self) -> EngineResult<Vec<Json>> {
        crate::snapshot::encode(self)
    }

    /// Rehydrates a world from `records`, produced by [`snapshot`].
    ///
    /// The native table must contain every id the snapshot references. On
    /// any error the interpreter is left untouched.
    pub fn restore(&mut self, records: &[Json]) -> Result<(), DecodeError> {
        self.natives.seal();
        crate::snapshot::restore(self, records)
    }

    pub(crate) fn install_world(&mut self, world: crate::snapshot::RestoredWorld) {
        let crate::snapshot::RestoredWorld {
            ast,
            states,
            threads,
            runnable,
            global_scope,
            registry,
            mut builtins,
            next_thread_id,
            scope_policy,
        } = world;

        // Error prototypes hang off the global constructors.
        let mut error_protos = IndexMap::new();
        for name in ERROR_CLASSES {
            let proto = global_scope
                .get(name)
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|ctor| crate::object::get_property(ctor, "prototype"))
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_else(|| builtins.error_proto.clone());
            error_protos.insert(name.to_string(), proto);
        }
        builtins.error_protos = error_protos;

        self.ast = ast;
        self.states = states;
        self.threads = threads;
        self.finished.clear();
        self.global_scope = global_scope;
        self.registry = registry;
        self.builtins = builtins;
        self.next_thread_id = next_thread_id;
        self.scope_policy = scope_policy;

        self.scheduler.clear();
        for tid in runnable {
            if self.threads.contains_key(&tid.0) {
                self.scheduler.enqueue(tid);
            }
        }
        for (key, thread) in &self.threads {
            match thread.status {
                ThreadStatus::Sleeping => {
                    if let Some(wake_at) = thread.wake_at {
                        self.scheduler.park_sleeping(ThreadId(*key), wake_at);
                    }
                }
                ThreadStatus::Blocked => {
                    if let Some(blocker) = thread.blocker.clone() {
                        self.scheduler.park_blocked(ThreadId(*key), blocker);
                    }
                }
                _ => {}
            }
        }
        log::info!(
            "world restored: {} threads, {} registry entries",
            self.threads.len(),
            self.registry.len()
        );
    }

    pub(crate) fn next_thread_id(&self) -> u64 {
        self.next_thread_id
    }

    // --- allocation helpers ----------------------------------------------

    pub(crate) fn alloc_state(&mut self, state: State) -> EngineResult<StateIx> {
        if self.states.live_count() >= self.limits.max_states {
            return Err(EngineError::StateLimitExceeded {
                count: self.states.live_count(),
                limit: self.limits.max_states,
            });
        }
        Ok(self.states.alloc(state))
    }

    /// Allocates a plain object with the default prototype.
    pub fn new_object(&self) -> ObjRef {
        ObjRef::new(PsObject::new(
            ClassTag::Object,
            Some(self.builtins.object_proto.clone()),
        ))
    }

    /// Allocates a plain object with an explicit prototype.
    pub fn new_object_with_proto(&self, proto: Option<ObjRef>) -> ObjRef {
        ObjRef::new(PsObject::new(ClassTag::Object, proto))
    }

    /// Allocates an empty array.
    pub fn new_array(&self) -> ObjRef {
        let arr = ObjRef::new(PsObject::new(
            ClassTag::Array,
            Some(self.builtins.array_proto.clone()),
        ));
        arr.borrow_mut().install_prop(
            "length",
            Property {
                value: Value::Number(0.0),
                attrs: PropertyAttrs::WRITABLE,
            },
        );
        arr
    }

    /// Allocates an array holding `items` in order.
    pub fn new_array_of(&self, items: &[Value]) -> ObjRef {
        let arr = self.new_array();
        {
            let mut borrowed = arr.borrow_mut();
            for (i, item) in items.iter().enumerate() {
                borrowed.set_prop(&i.to_string(), item.clone());
            }
        }
        arr
    }

    /// Allocates an error of the given class with a message.
    pub fn new_error(&self, class: &str, message: &str) -> ObjRef {
        let proto = self
            .builtins
            .error_protos
            .get(class)
            .cloned()
            .unwrap_or_else(|| self.builtins.error_proto.clone());
        let err = ObjRef::new(PsObject::new(ClassTag::Error, Some(proto)));
        err.borrow_mut()
            .install_prop("message", Property::hidden(Value::string(message)));
        err
    }

    /// Allocates an error and wraps it as a value.
    pub fn new_error_value(&self, class: &str, message: &str) -> Value {
        Value::Object(self.new_error(class, message))
    }

    /// Allocates a regular expression object.
    pub fn new_regexp(&self, source: &str, flags: &str) -> ObjRef {
        ObjRef::new(PsObject::with_slots(
            ClassTag::RegExp,
            Some(self.builtins.regexp_proto.clone()),
            InternalSlots::RegExp {
                source: source.to_string(),
                flags: flags.to_string(),
            },
        ))
    }

    /// Allocates a date object.
    pub fn new_date(&self, ms: f64) -> ObjRef {
        ObjRef::new(PsObject::with_slots(
            ClassTag::Date,
            Some(self.builtins.date_proto.clone()),
            InternalSlots::Date(ms),
        ))
    }

    /// Allocates a source-defined function closure.
    pub fn new_declared_function(
        &self,
        params: Vec<String>,
        body: NodeIx,
        scope: ScopeRef,
        name: Option<String>,
    ) -> ObjRef {
        let arity = params.len();
        let func = ObjRef::new(PsObject::with_slots(
            ClassTag::Function,
            Some(self.builtins.function_proto.clone()),
            InternalSlots::Function(FunctionSlots::Declared {
                params,
                body,
                scope,
                name: name.clone(),
            }),
        ));
        let proto = self.new_object();
        proto
            .borrow_mut()
            .install_prop("constructor", Property::hidden(Value::Object(func.clone())));
        {
            let mut borrowed = func.borrow_mut();
            borrowed.install_prop("prototype", Property::hidden(Value::Object(proto)));
            borrowed.install_prop("length", Property::locked(Value::Number(arity as f64)));
            if let Some(name) = name {
                borrowed.install_prop("name", Property::locked(Value::string(name)));
            }
        }
        func
    }

    /// Allocates a function object bound to a registered native.
    pub fn new_native_function(&self, id: &str) -> EngineResult<ObjRef> {
        if !self.natives.contains(id) {
            return Err(EngineError::UnknownNative { id: id.to_string() });
        }
        let func = ObjRef::new(PsObject::with_slots(
            ClassTag::Function,
            Some(self.builtins.function_proto.clone()),
            InternalSlots::Function(FunctionSlots::Native { id: id.to_string() }),
        ));
        func.borrow_mut()
            .install_prop("name", Property::locked(Value::string(id)));
        Ok(func)
    }

    /// Allocates an `arguments` object for a call.
    pub fn new_arguments(&self, args: &[Value]) -> ObjRef {
        let obj = ObjRef::new(PsObject::new(
            ClassTag::Arguments,
            Some(self.builtins.object_proto.clone()),
        ));
        {
            let mut borrowed = obj.borrow_mut();
            for (i, arg) in args.iter().enumerate() {
                borrowed.set_prop(&i.to_string(), arg.clone());
            }
            borrowed.install_prop(
                "length",
                Property::hidden(Value::Number(args.len() as f64)),
            );
        }
        obj
    }

    /// Allocates a handle object for an interpreter thread.
    pub fn new_thread_handle(&self, tid: ThreadId) -> ObjRef {
        ObjRef::new(PsObject::with_slots(
            ClassTag::Thread,
            Some(self.builtins.thread_proto.clone()),
            InternalSlots::Thread(tid.0),
        ))
    }

    // --- AST helpers ------------------------------------------------------

    /// Name of an `Identifier` node.
    pub fn identifier_name(&self, ix: NodeIx) -> EngineResult<String> {
        match self.ast.get(ix).map(|n| &n.kind) {
            Some(NodeKind::Identifier { name }) => Ok(name.clone()),
            Some(other) => Err(EngineError::invalid_program(format!(
                "expected Identifier, got {}",
                other.type_name()
            ))),
            None => Err(EngineError::invalid_program(format!(
                "node {} out of range",
                ix.0
            ))),
        }
    }

    /// Names of a parameter list.
    pub fn param_names(&self, params: &[NodeIx]) -> EngineResult<Vec<String>> {
        params.iter().map(|p| self.identifier_name(*p)).collect()
    }
}
