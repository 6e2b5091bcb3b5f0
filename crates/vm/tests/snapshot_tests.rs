//! Integration tests for world snapshots: round-tripping, reference
//! sharing, numeric fidelity, failure modes, and cross-checkpoint resume.

mod common;

use common::*;
use serde_json::{json, Value as Json};

use burrow_vm::{
    object, DecodeError, EngineResult, Interpreter, ManualClock, NativeCall, NativeOutcome,
    RunState, Value,
};

fn drive(interp: &mut Interpreter, clock: &ManualClock) {
    for _ in 0..200_000 {
        match interp.run(1_000_000).expect("runs") {
            RunState::Done => return,
            RunState::Idle => clock.advance(1),
            RunState::Budget => {}
        }
    }
    panic!("world did not finish");
}

fn array_len(value: &Value) -> u32 {
    let obj = value.as_object().expect("an array").clone();
    let borrowed = obj.borrow();
    object::array_length(&borrowed)
}

fn array_get(value: &Value, i: u32) -> Value {
    let obj = value.as_object().expect("an array").clone();
    let borrowed = obj.borrow();
    borrowed.own_value(&i.to_string()).unwrap_or(Value::Undefined)
}

#[test]
fn checkpoint_resumes_at_any_step_boundary() {
    let prog = program(vec![
        var_decl("x", Some(num(0.0))),
        expr_stmt(assign("=", ident("x"), num(44.0))),
        expr_stmt(ident("x")),
    ]);
    for budget in [1u64, 2, 3, 5, 8, 13] {
        let (mut a, _clock) = world();
        let root = a.load_program(&prog).expect("loads");
        let tid = a.spawn(root).expect("spawns");
        let _ = a.run(budget).expect("partial run");

        let records = a.snapshot().expect("snapshot");
        let (mut b, _clock_b) = world();
        b.restore(&records).expect("restore");

        assert_eq!(a.run(1_000_000).expect("finish a"), RunState::Done);
        assert_eq!(b.run(1_000_000).expect("finish b"), RunState::Done);
        assert_eq!(a.thread_result(tid).unwrap().to_number(), 44.0);
        assert_eq!(b.thread_result(tid).unwrap().to_number(), 44.0);
        assert_eq!(global(&b, "x").to_number(), 44.0);
    }
}

#[test]
fn identical_worlds_produce_identical_snapshots() {
    let prog = program(vec![
        var_decl("o", Some(object_lit(vec![("n", num(3.0))]))),
        var_decl("a", Some(array_lit(vec![ident("o"), str_lit("two")]))),
        expr_stmt(assign("=", member(ident("o"), "self"), ident("o"))),
    ]);
    let build = || {
        let (mut interp, _clock) = world();
        let root = interp.load_program(&prog).expect("loads");
        interp.spawn(root).expect("spawns");
        let _ = interp.run(7).expect("partial run");
        interp.snapshot().expect("snapshot")
    };
    assert_eq!(build(), build());

    // Snapshotting twice without running in between is also stable.
    let (mut interp, _clock) = world();
    let root = interp.load_program(&prog).expect("loads");
    interp.spawn(root).expect("spawns");
    interp.run(1_000_000).expect("runs");
    assert_eq!(
        interp.snapshot().expect("first"),
        interp.snapshot().expect("second")
    );
}

#[test]
fn shared_references_are_encoded_once() {
    let prog = program(vec![
        var_decl("a", Some(object_lit(vec![]))),
        var_decl("b", Some(array_lit(vec![ident("a"), ident("a")]))),
        expr_stmt(ident("b")),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);

    let records = a.snapshot().expect("snapshot");
    let array_rec = records
        .iter()
        .find(|r| {
            r.get("type") == Some(&json!("Array"))
                && r.get("props").and_then(|p| p.get("0")).is_some()
        })
        .expect("the snapshot contains the array");
    let props = array_rec.get("props").unwrap();
    let first = props.get("0").expect("element 0");
    let second = props.get("1").expect("element 1");
    assert!(first.get("#").is_some(), "elements are references: {first}");
    assert_eq!(first, second, "both elements reference the same record");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let shared = global(&b, "b");
    let e0 = array_get(&shared, 0);
    let e1 = array_get(&shared, 1);
    let (e0, e1) = (e0.as_object().unwrap().clone(), e1.as_object().unwrap().clone());
    assert!(e0.ptr_eq(&e1), "sharing survives the round trip");
    assert!(e0.ptr_eq(global(&b, "a").as_object().unwrap()));
}

#[test]
fn cyclic_structures_round_trip() {
    let prog = program(vec![
        var_decl("o", Some(object_lit(vec![]))),
        expr_stmt(assign("=", member(ident("o"), "me"), ident("o"))),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let o = global(&b, "o");
    let me = {
        let obj = o.as_object().unwrap().clone();
        let borrowed = obj.borrow();
        borrowed.own_value("me").unwrap()
    };
    assert!(me.as_object().unwrap().ptr_eq(o.as_object().unwrap()));
}

#[test]
fn special_numbers_survive_bit_for_bit() {
    let prog = program(vec![
        var_decl("nz", Some(unary("-", num(0.0)))),
        var_decl("inf", Some(bin("/", num(1.0), num(0.0)))),
        var_decl("ninf", Some(bin("/", num(-1.0), num(0.0)))),
        var_decl("nan", Some(bin("/", num(0.0), num(0.0)))),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let text = serde_json::to_string(&records).expect("renders");
    for tag in ["\"-0\"", "\"Infinity\"", "\"-Infinity\"", "\"NaN\""] {
        assert!(text.contains(tag), "snapshot text carries {tag}");
    }

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    match global(&b, "nz") {
        Value::Number(n) => assert!(burrow_vm::value::is_negative_zero(n)),
        other => panic!("nz is {other:?}"),
    }
    assert_eq!(global(&b, "inf").to_number(), f64::INFINITY);
    assert_eq!(global(&b, "ninf").to_number(), f64::NEG_INFINITY);
    assert!(global(&b, "nan").to_number().is_nan());
}

#[test]
fn dates_and_regexps_round_trip() {
    let prog = program(vec![
        var_decl("d", Some(new_expr(ident("Date"), vec![num(86_400_000.0)]))),
        var_decl("r", Some(json!({
            "type": "Literal",
            "regex": {"pattern": "x+", "flags": "i"}
        }))),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let check = program(vec![expr_stmt(call(
        member(
            array_lit(vec![
                call(member(ident("d"), "getTime"), vec![]),
                call(member(ident("r"), "toString"), vec![]),
            ]),
            "join",
        ),
        vec![str_lit("|")],
    ))]);
    assert_eq!(eval(&mut b, &check).to_js_string(), "86400000|/x+/i");
}

#[test]
fn closures_and_functions_round_trip() {
    let prog = program(vec![
        func_decl(
            "makeAdder",
            vec!["n"],
            vec![ret(Some(func_expr(
                vec!["m"],
                vec![ret(Some(bin("+", ident("n"), ident("m"))))],
            )))],
        ),
        var_decl("add5", Some(call(ident("makeAdder"), vec![num(5.0)]))),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let check = program(vec![expr_stmt(call(ident("add5"), vec![num(37.0)]))]);
    assert_eq!(eval(&mut b, &check).to_number(), 42.0);
}

#[test]
fn registry_entries_round_trip() {
    let (mut a, _clock) = world();
    let shrine = a.new_object();
    shrine.borrow_mut().set_prop("offerings", Value::Number(7.0));
    a.registry_mut().register("shrine", shrine);

    let records = a.snapshot().expect("snapshot");
    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");

    let restored = b.registry().get("shrine").expect("registry entry");
    assert_eq!(
        restored.borrow().own_value("offerings").unwrap().to_number(),
        7.0
    );
}

#[test]
fn cross_checkpoint_sleeper_resumes_mid_loop() {
    const ITERATIONS: f64 = 10_000.0;
    let prog = program(vec![
        var_decl("log", Some(array_lit(vec![]))),
        func_decl(
            "worker",
            vec![],
            vec![
                var_decl("i", Some(num(0.0))),
                while_stmt(
                    bin("<", ident("i"), num(ITERATIONS)),
                    block(vec![
                        expr_stmt(call(member(ident("log"), "push"), vec![ident("i")])),
                        expr_stmt(call(ident("sleep"), vec![num(1.0)])),
                        expr_stmt(assign("=", ident("i"), bin("+", ident("i"), num(1.0)))),
                    ]),
                ),
            ],
        ),
        expr_stmt(call(ident("spawn"), vec![ident("worker")])),
    ]);

    let (mut a, clock) = world();
    let root = a.load_program(&prog).expect("loads");
    a.spawn(root).expect("spawns");

    // Let the fiber complete roughly one hundred iterations.
    let mut budget = 0;
    while array_len(&global(&a, "log")) < 100 {
        match a.run(500).expect("runs") {
            RunState::Done => panic!("worker finished too early"),
            RunState::Idle => clock.advance(1),
            RunState::Budget => {}
        }
        budget += 1;
        assert!(budget < 10_000, "worker never reached 100 iterations");
    }
    let seen = array_len(&global(&a, "log"));
    let records = a.snapshot().expect("snapshot");

    // The restored world picks up where the original stopped.
    let mut b = Interpreter::with_clock(Box::new(clock.clone())).expect("world boots");
    b.restore(&records).expect("restore");
    assert_eq!(array_len(&global(&b, "log")), seen);

    drive(&mut a, &clock);
    drive(&mut b, &clock);

    for interp in [&a, &b] {
        let log = global(interp, "log");
        assert_eq!(array_len(&log), ITERATIONS as u32);
        assert_eq!(array_get(&log, 100).to_number(), 100.0);
        assert_eq!(array_get(&log, 9_999).to_number(), 9_999.0);
    }
}

fn host_extra(_interp: &mut Interpreter, _call: NativeCall) -> EngineResult<NativeOutcome> {
    Ok(NativeOutcome::Value(Value::Number(1.0)))
}

#[test]
fn missing_native_id_fails_decode() {
    let (mut a, _clock) = world();
    a.natives_mut()
        .register("host.extra", host_extra)
        .expect("registers");
    let func = a.new_native_function("host.extra").expect("builds");
    a.global_scope().declare_set("extraFn", Value::Object(func));
    let _ = eval(&mut a, &program(vec![expr_stmt(num(1.0))]));

    let records = a.snapshot().expect("snapshot");
    let (mut b, _clock_b) = world();
    let marker = program(vec![var_decl("marker", Some(num(1.0)))]);
    let _ = eval(&mut b, &marker);

    let err = b.restore(&records).unwrap_err();
    assert_eq!(
        err,
        DecodeError::MissingNative {
            id: "host.extra".to_string()
        }
    );
    assert_eq!(err.taxonomy(), "RangeError");

    // The failed decode left the world untouched.
    assert_eq!(global(&b, "marker").to_number(), 1.0);
    let still_works = program(vec![expr_stmt(bin("+", num(20.0), num(22.0)))]);
    assert_eq!(eval(&mut b, &still_works).to_number(), 42.0);
}

#[test]
fn corrupted_snapshots_are_rejected() {
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &program(vec![var_decl("x", Some(num(1.0)))]));
    let records = a.snapshot().expect("snapshot");

    // Empty top level.
    let (mut b, _clock_b) = world();
    assert!(matches!(b.restore(&[]), Err(DecodeError::Shape { .. })));

    // Record 0 must be the interpreter.
    let mut bad = records.clone();
    bad[0] = json!({"type": "Object"});
    assert!(matches!(b.restore(&bad), Err(DecodeError::Shape { .. })));

    // Unknown record type.
    let mut bad = records.clone();
    let last = bad.len() - 1;
    bad[last]["type"] = json!("Gremlin");
    assert!(matches!(
        b.restore(&bad),
        Err(DecodeError::UnknownType { .. })
    ));

    // Dangling reference.
    let mut bad = records.clone();
    bad[0]["globalScope"] = json!({"#": 999_999});
    assert!(matches!(
        b.restore(&bad),
        Err(DecodeError::DanglingReference { index: 999_999 })
    ));

    // Future format version.
    let mut bad = records.clone();
    bad[0]["version"] = json!(99);
    assert!(matches!(
        b.restore(&bad),
        Err(DecodeError::UnsupportedVersion { version: 99 })
    ));

    // A valid snapshot still restores after all those failures.
    b.restore(&records).expect("good snapshot restores");
    assert_eq!(global(&b, "x").to_number(), 1.0);
}

#[test]
fn record_zero_is_versioned_interpreter_root() {
    let (a, _clock) = world();
    let records = a.snapshot().expect("snapshot");
    assert_eq!(records[0]["type"], json!("Interpreter"));
    assert_eq!(records[0]["version"], json!(burrow_vm::SNAPSHOT_VERSION));
    assert_eq!(records[0]["#"], json!(0));
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec["#"], json!(i), "record {i} carries its own index");
        assert!(rec.get("type").is_some(), "record {i} carries a type");
    }
}

#[test]
fn weak_entries_are_not_kept_alive_by_snapshots() {
    let prog = program(vec![
        var_decl("ws", Some(new_expr(ident("WeakSet"), vec![]))),
        var_decl("a", Some(object_lit(vec![]))),
        var_decl("b", Some(object_lit(vec![]))),
        var_decl("c", Some(object_lit(vec![]))),
        expr_stmt(call(member(ident("ws"), "add"), vec![ident("a")])),
        expr_stmt(call(member(ident("ws"), "add"), vec![ident("b")])),
        expr_stmt(call(member(ident("ws"), "add"), vec![ident("c")])),
        // Drop the only strong reference to b.
        expr_stmt(assign("=", ident("b"), null_lit())),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);

    let records = a.snapshot().expect("snapshot");
    let weak_rec = records
        .iter()
        .find(|r| r.get("type") == Some(&json!("IterableWeakSet")))
        .expect("weak set record");
    let data = weak_rec.get("data").and_then(Json::as_array).expect("data");
    assert_eq!(data.len(), 2, "the dead entry is absent from the snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let check = program(vec![expr_stmt(call(
        member(ident("ws"), "size"),
        vec![],
    ))]);
    assert_eq!(eval(&mut b, &check).to_number(), 2.0);

    let identity = program(vec![expr_stmt(logical(
        "&&",
        bin(
            "===",
            index(call(member(ident("ws"), "values"), vec![]), num(0.0)),
            ident("a"),
        ),
        bin(
            "===",
            index(call(member(ident("ws"), "values"), vec![]), num(1.0)),
            ident("c"),
        ),
    ))]);
    assert!(eval(&mut b, &identity).to_boolean());
}

#[test]
fn maps_and_sets_round_trip_in_order() {
    let prog = program(vec![
        var_decl("m", Some(new_expr(ident("Map"), vec![]))),
        var_decl("key", Some(object_lit(vec![]))),
        expr_stmt(call(member(ident("m"), "set"), vec![str_lit("one"), num(1.0)])),
        expr_stmt(call(member(ident("m"), "set"), vec![ident("key"), num(2.0)])),
        var_decl("s", Some(new_expr(ident("Set"), vec![]))),
        expr_stmt(call(member(ident("s"), "add"), vec![str_lit("x")])),
        expr_stmt(call(member(ident("s"), "add"), vec![str_lit("y")])),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let check = program(vec![expr_stmt(call(
        member(
            array_lit(vec![
                call(member(ident("m"), "get"), vec![str_lit("one")]),
                call(member(ident("m"), "get"), vec![ident("key")]),
                call(member(ident("m"), "size"), vec![]),
                call(member(ident("s"), "has"), vec![str_lit("y")]),
                call(member(ident("s"), "size"), vec![]),
            ]),
            "join",
        ),
        vec![str_lit(",")],
    ))]);
    assert_eq!(eval(&mut b, &check).to_js_string(), "1,2,2,true,2");
}

#[test]
fn property_attributes_and_extensibility_round_trip() {
    let prog = program(vec![
        var_decl("o", Some(object_lit(vec![("plain", num(1.0))]))),
        expr_stmt(call(
            member(ident("Object"), "defineProperty"),
            vec![
                ident("o"),
                str_lit("locked"),
                object_lit(vec![("value", num(2.0))]),
            ],
        )),
        expr_stmt(call(
            member(ident("Object"), "preventExtensions"),
            vec![ident("o")],
        )),
    ]);
    let (mut a, _clock) = world();
    let _ = eval(&mut a, &prog);
    let records = a.snapshot().expect("snapshot");

    let (mut b, _clock_b) = world();
    b.restore(&records).expect("restore");
    let check = program(vec![
        // Writing the locked slot fails silently; adding is rejected too.
        expr_stmt(assign("=", member(ident("o"), "locked"), num(9.0))),
        expr_stmt(assign("=", member(ident("o"), "fresh"), num(9.0))),
        expr_stmt(call(
            member(
                array_lit(vec![
                    member(ident("o"), "locked"),
                    unary("typeof", member(ident("o"), "fresh")),
                    call(member(ident("Object"), "isExtensible"), vec![ident("o")]),
                    call(member(ident("Object"), "keys"), vec![ident("o")]),
                ]),
                "join",
            ),
            vec![str_lit("|")],
        )),
    ]);
    assert_eq!(eval(&mut b, &check).to_js_string(), "2|undefined|false|plain");
}
