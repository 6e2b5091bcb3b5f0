//! Integration tests for the fiber scheduler: fairness, timers, blockers,
//! spawn, and kill semantics.

mod common;

use common::*;

use burrow_vm::{
    Blocker, EngineLimits, EngineResult, Interpreter, NativeCall, NativeOutcome, RunState, Value,
};

#[test]
fn round_robin_is_fair_across_threads() {
    let (mut interp, _clock) = world();
    interp.set_limits(EngineLimits {
        step_budget: 50,
        ..EngineLimits::default()
    });

    for name in ["a", "b", "c"] {
        let prog = program(vec![
            var_decl(name, Some(num(0.0))),
            while_stmt(
                bool_lit(true),
                block(vec![expr_stmt(update("++", false, ident(name)))]),
            ),
        ]);
        let root = interp.load_program(&prog).expect("loads");
        interp.spawn(root).expect("spawns");
    }

    assert_eq!(interp.run(3_000).expect("runs"), RunState::Budget);

    let counts: Vec<f64> = ["a", "b", "c"]
        .iter()
        .map(|name| global(&interp, name).to_number())
        .collect();
    for count in &counts {
        assert!(*count > 0.0, "every thread made progress: {counts:?}");
    }
    let max = counts.iter().cloned().fold(0.0f64, f64::max);
    let min = counts.iter().cloned().fold(f64::INFINITY, f64::min);
    assert!(
        max / min < 4.0,
        "round-robin keeps threads within a slice of each other: {counts:?}"
    );
}

#[test]
fn sleep_parks_until_the_clock_arrives() {
    let (mut interp, clock) = world();
    let prog = program(vec![
        var_decl("done", Some(bool_lit(false))),
        expr_stmt(call(ident("sleep"), vec![num(50.0)])),
        expr_stmt(assign("=", ident("done"), bool_lit(true))),
    ]);
    let root = interp.load_program(&prog).expect("loads");
    interp.spawn(root).expect("spawns");

    assert_eq!(interp.run(10_000).expect("runs"), RunState::Idle);
    assert!(!global(&interp, "done").to_boolean());

    clock.advance(49);
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Idle);
    assert!(!global(&interp, "done").to_boolean());

    clock.advance(1);
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Done);
    assert!(global(&interp, "done").to_boolean());
}

#[test]
fn suspend_yields_to_other_threads() {
    let (mut interp, _clock) = world();
    let setup = program(vec![var_decl("trace", Some(array_lit(vec![])))]);
    let root = interp.load_program(&setup).expect("loads");
    interp.spawn(root).expect("spawns");
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Done);

    for tag in ["a", "b"] {
        // Each fiber keeps its own counter; the global scope is shared.
        let counter = format!("i_{tag}");
        let prog = program(vec![
            var_decl(&counter, None),
            for_stmt(
                Some(expr_stmt(assign("=", ident(&counter), num(0.0)))),
                Some(bin("<", ident(&counter), num(3.0))),
                Some(update("++", false, ident(&counter))),
                block(vec![
                    expr_stmt(call(member(ident("trace"), "push"), vec![str_lit(tag)])),
                    expr_stmt(call(ident("suspend"), vec![])),
                ]),
            ),
        ]);
        let root = interp.load_program(&prog).expect("loads");
        interp.spawn(root).expect("spawns");
    }

    assert_eq!(interp.run(100_000).expect("runs"), RunState::Done);
    let joined = {
        let trace = global(&interp, "trace");
        let obj = trace.as_object().expect("trace array").clone();
        let borrowed = obj.borrow();
        (0..burrow_vm::object::array_length(&borrowed))
            .map(|i| {
                borrowed
                    .own_value(&i.to_string())
                    .map(|v| v.to_js_string())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",")
    };
    assert_eq!(joined, "a,b,a,b,a,b");
}

#[test]
fn spawn_builtin_runs_a_fiber() {
    let (mut interp, _clock) = world();
    let prog = program(vec![
        var_decl("hits", Some(num(0.0))),
        func_decl(
            "worker",
            vec!["n"],
            vec![expr_stmt(assign("+=", ident("hits"), ident("n")))],
        ),
        expr_stmt(call(ident("spawn"), vec![ident("worker"), num(5.0)])),
        expr_stmt(call(ident("spawn"), vec![ident("worker"), num(7.0)])),
    ]);
    let root = interp.load_program(&prog).expect("loads");
    interp.spawn(root).expect("spawns");
    assert_eq!(interp.run(100_000).expect("runs"), RunState::Done);
    assert_eq!(global(&interp, "hits").to_number(), 12.0);
}

#[test]
fn spawn_rejects_non_functions() {
    let (mut interp, _clock) = world();
    let prog = program(vec![expr_stmt(call(ident("spawn"), vec![num(3.0)]))]);
    let error = eval_uncaught(&mut interp, &prog);
    assert_eq!(error_parts(&error).0, "TypeError");
}

#[test]
fn killed_thread_skips_finally() {
    let (mut interp, clock) = world();
    let prog = program(vec![
        var_decl("finRan", Some(bool_lit(false))),
        func_decl(
            "loiter",
            vec![],
            vec![try_stmt(
                vec![while_stmt(
                    bool_lit(true),
                    block(vec![expr_stmt(call(ident("sleep"), vec![num(1.0)]))]),
                )],
                None,
                Some(vec![expr_stmt(assign("=", ident("finRan"), bool_lit(true)))]),
            )],
        ),
        var_decl("handle", Some(call(ident("spawn"), vec![ident("loiter")]))),
    ]);
    let root = interp.load_program(&prog).expect("loads");
    interp.spawn(root).expect("spawns");
    assert_eq!(interp.run(100_000).expect("runs"), RunState::Idle);

    // The fiber is asleep; kill it from the user side.
    let killer = program(vec![expr_stmt(call(ident("kill"), vec![ident("handle")]))]);
    let root = interp.load_program(&killer).expect("loads");
    interp.spawn(root).expect("spawns");
    assert_eq!(interp.run(100_000).expect("runs"), RunState::Done);

    clock.advance(1_000);
    assert_eq!(interp.run(100_000).expect("runs"), RunState::Done);
    assert!(
        !global(&interp, "finRan").to_boolean(),
        "finally must not run for killed threads"
    );
}

#[test]
fn host_kill_discards_a_running_thread() {
    let (mut interp, _clock) = world();
    let prog = program(vec![
        var_decl("n", Some(num(0.0))),
        while_stmt(
            bool_lit(true),
            block(vec![expr_stmt(update("++", false, ident("n")))]),
        ),
    ]);
    let root = interp.load_program(&prog).expect("loads");
    let tid = interp.spawn(root).expect("spawns");

    assert_eq!(interp.run(1_000).expect("runs"), RunState::Budget);
    assert!(interp.thread_is_live(tid));

    interp.kill(tid).expect("kill accepted");
    assert_eq!(interp.run(1_000).expect("runs"), RunState::Done);
    assert!(!interp.thread_is_live(tid));
    assert!(interp.thread_uncaught(tid).is_none());
}

fn block_on_net(interp: &mut Interpreter, call: NativeCall) -> EngineResult<NativeOutcome> {
    let _ = call;
    if interp.registry().get("net-ready").is_some() {
        Ok(NativeOutcome::Value(Value::Number(99.0)))
    } else {
        Ok(NativeOutcome::Block {
            blocker: Blocker::Named("net".to_string()),
        })
    }
}

#[test]
fn blocked_thread_resumes_on_io_readiness() {
    let (mut interp, _clock) = world();
    interp
        .natives_mut()
        .register("test.blockOnNet", block_on_net)
        .expect("registers");
    let func = interp
        .new_native_function("test.blockOnNet")
        .expect("builds function");
    interp
        .global_scope()
        .declare_set("blockOnNet", Value::Object(func));

    let prog = program(vec![
        var_decl("r", Some(call(ident("blockOnNet"), vec![]))),
        expr_stmt(ident("r")),
    ]);
    let root = interp.load_program(&prog).expect("loads");
    let tid = interp.spawn(root).expect("spawns");

    assert_eq!(interp.run(10_000).expect("runs"), RunState::Idle);
    assert!(interp.thread_is_live(tid));

    // Host reports readiness; the native is invoked again and completes.
    let marker = interp.new_object();
    interp.registry_mut().register("net-ready", marker);
    interp.notify_io_ready(&Blocker::Named("net".to_string()));
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Done);
    assert_eq!(interp.thread_result(tid).unwrap().to_number(), 99.0);
}

#[test]
fn sleeping_threads_wake_in_time_order() {
    let (mut interp, clock) = world();
    let setup = program(vec![var_decl("order", Some(array_lit(vec![])))]);
    let root = interp.load_program(&setup).expect("loads");
    interp.spawn(root).expect("spawns");
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Done);

    for (tag, delay) in [("slow", 30.0), ("fast", 10.0), ("mid", 20.0)] {
        let prog = program(vec![
            expr_stmt(call(ident("sleep"), vec![num(delay)])),
            expr_stmt(call(member(ident("order"), "push"), vec![str_lit(tag)])),
        ]);
        let root = interp.load_program(&prog).expect("loads");
        interp.spawn(root).expect("spawns");
    }

    assert_eq!(interp.run(10_000).expect("runs"), RunState::Idle);
    clock.advance(100);
    assert_eq!(interp.run(10_000).expect("runs"), RunState::Done);

    let prog = program(vec![expr_stmt(call(
        member(ident("order"), "join"),
        vec![str_lit(",")],
    ))]);
    assert_eq!(eval(&mut interp, &prog).to_js_string(), "fast,mid,slow");
}
