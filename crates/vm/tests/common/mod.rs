//! Shared test plumbing: a world factory and ESTree JSON builders.
//!
//! Programs reach the interpreter the way a host parser delivers them, as
//! ESTree-shaped JSON; the builders below keep the literals readable.

#![allow(dead_code)]

use serde_json::{json, Value as Json};

use burrow_vm::{Interpreter, ManualClock, RunState, Value};

/// Fresh world on a hand-driven clock.
pub fn world() -> (Interpreter, ManualClock) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = ManualClock::new();
    let interp = Interpreter::with_clock(Box::new(clock.clone())).expect("world boots");
    (interp, clock)
}

/// Loads and runs `program` to completion, returning the completion value.
pub fn eval(interp: &mut Interpreter, program: &Json) -> Value {
    let root = interp.load_program(program).expect("program loads");
    let tid = interp.spawn(root).expect("program spawns");
    assert_eq!(interp.run(1_000_000).expect("runs"), RunState::Done);
    if let Some(uncaught) = interp.thread_uncaught(tid) {
        panic!("uncaught error: {}", uncaught.to_js_string());
    }
    interp.thread_result(tid).expect("thread has a result")
}

/// Builds a world, runs one program, returns the completion value.
pub fn eval_fresh(program: &Json) -> Value {
    let (mut interp, _clock) = world();
    eval(&mut interp, program)
}

/// Runs a program expected to die on an uncaught user error.
pub fn eval_uncaught(interp: &mut Interpreter, program: &Json) -> Value {
    let root = interp.load_program(program).expect("program loads");
    let tid = interp.spawn(root).expect("program spawns");
    assert_eq!(interp.run(1_000_000).expect("runs"), RunState::Done);
    interp
        .thread_uncaught(tid)
        .expect("thread should die on an uncaught error")
}

/// Name and message of a user error value.
pub fn error_parts(error: &Value) -> (String, String) {
    let obj = error.as_object().expect("error is an object");
    let name = obj
        .borrow()
        .lookup_value("name")
        .map(|v| v.to_js_string())
        .unwrap_or_default();
    let message = obj
        .borrow()
        .lookup_value("message")
        .map(|v| v.to_js_string())
        .unwrap_or_default();
    (name, message)
}

/// Reads a global variable after a run.
pub fn global(interp: &Interpreter, name: &str) -> Value {
    interp
        .global_scope()
        .get(name)
        .unwrap_or_else(|| panic!("global {name} is not defined"))
}

// --- ESTree builders ------------------------------------------------------

pub fn program(body: Vec<Json>) -> Json {
    json!({"type": "Program", "body": body})
}

pub fn block(body: Vec<Json>) -> Json {
    json!({"type": "BlockStatement", "body": body})
}

pub fn expr_stmt(expression: Json) -> Json {
    json!({"type": "ExpressionStatement", "expression": expression})
}

pub fn num(n: f64) -> Json {
    json!({"type": "Literal", "value": n})
}

pub fn str_lit(s: &str) -> Json {
    json!({"type": "Literal", "value": s})
}

pub fn bool_lit(b: bool) -> Json {
    json!({"type": "Literal", "value": b})
}

pub fn null_lit() -> Json {
    json!({"type": "Literal", "value": null})
}

pub fn ident(name: &str) -> Json {
    json!({"type": "Identifier", "name": name})
}

pub fn this_expr() -> Json {
    json!({"type": "ThisExpression"})
}

pub fn bin(op: &str, left: Json, right: Json) -> Json {
    json!({"type": "BinaryExpression", "operator": op, "left": left, "right": right})
}

pub fn logical(op: &str, left: Json, right: Json) -> Json {
    json!({"type": "LogicalExpression", "operator": op, "left": left, "right": right})
}

pub fn unary(op: &str, argument: Json) -> Json {
    json!({"type": "UnaryExpression", "operator": op, "argument": argument})
}

pub fn update(op: &str, prefix: bool, argument: Json) -> Json {
    json!({"type": "UpdateExpression", "operator": op, "prefix": prefix, "argument": argument})
}

pub fn assign(op: &str, left: Json, right: Json) -> Json {
    json!({"type": "AssignmentExpression", "operator": op, "left": left, "right": right})
}

pub fn conditional(test: Json, consequent: Json, alternate: Json) -> Json {
    json!({
        "type": "ConditionalExpression",
        "test": test,
        "consequent": consequent,
        "alternate": alternate
    })
}

pub fn sequence(expressions: Vec<Json>) -> Json {
    json!({"type": "SequenceExpression", "expressions": expressions})
}

pub fn var_decl(name: &str, init: Option<Json>) -> Json {
    json!({
        "type": "VariableDeclaration",
        "declarations": [{
            "type": "VariableDeclarator",
            "id": ident(name),
            "init": init
        }]
    })
}

pub fn func_decl(name: &str, params: Vec<&str>, body: Vec<Json>) -> Json {
    json!({
        "type": "FunctionDeclaration",
        "id": ident(name),
        "params": params.into_iter().map(ident).collect::<Vec<_>>(),
        "body": block(body)
    })
}

pub fn func_expr(params: Vec<&str>, body: Vec<Json>) -> Json {
    json!({
        "type": "FunctionExpression",
        "id": null,
        "params": params.into_iter().map(ident).collect::<Vec<_>>(),
        "body": block(body)
    })
}

pub fn ret(argument: Option<Json>) -> Json {
    json!({"type": "ReturnStatement", "argument": argument})
}

pub fn throw(argument: Json) -> Json {
    json!({"type": "ThrowStatement", "argument": argument})
}

pub fn if_stmt(test: Json, consequent: Json, alternate: Option<Json>) -> Json {
    json!({"type": "IfStatement", "test": test, "consequent": consequent, "alternate": alternate})
}

pub fn while_stmt(test: Json, body: Json) -> Json {
    json!({"type": "WhileStatement", "test": test, "body": body})
}

pub fn do_while(body: Json, test: Json) -> Json {
    json!({"type": "DoWhileStatement", "body": body, "test": test})
}

pub fn for_stmt(init: Option<Json>, test: Option<Json>, update: Option<Json>, body: Json) -> Json {
    json!({"type": "ForStatement", "init": init, "test": test, "update": update, "body": body})
}

pub fn for_in(left: Json, right: Json, body: Json) -> Json {
    json!({"type": "ForInStatement", "left": left, "right": right, "body": body})
}

pub fn brk(label: Option<&str>) -> Json {
    json!({"type": "BreakStatement", "label": label.map(ident)})
}

pub fn cont(label: Option<&str>) -> Json {
    json!({"type": "ContinueStatement", "label": label.map(ident)})
}

pub fn labeled(label: &str, body: Json) -> Json {
    json!({"type": "LabeledStatement", "label": ident(label), "body": body})
}

pub fn try_stmt(block_stmts: Vec<Json>, handler: Option<(&str, Vec<Json>)>, finalizer: Option<Vec<Json>>) -> Json {
    json!({
        "type": "TryStatement",
        "block": block(block_stmts),
        "handler": handler.map(|(param, body)| json!({
            "type": "CatchClause",
            "param": ident(param),
            "body": block(body)
        })),
        "finalizer": finalizer.map(block)
    })
}

pub fn switch_stmt(discriminant: Json, cases: Vec<Json>) -> Json {
    json!({"type": "SwitchStatement", "discriminant": discriminant, "cases": cases})
}

pub fn case(test: Option<Json>, consequent: Vec<Json>) -> Json {
    json!({"type": "SwitchCase", "test": test, "consequent": consequent})
}

pub fn member(object: Json, property: &str) -> Json {
    json!({
        "type": "MemberExpression",
        "object": object,
        "property": ident(property),
        "computed": false
    })
}

pub fn index(object: Json, property: Json) -> Json {
    json!({
        "type": "MemberExpression",
        "object": object,
        "property": property,
        "computed": true
    })
}

pub fn call(callee: Json, arguments: Vec<Json>) -> Json {
    json!({"type": "CallExpression", "callee": callee, "arguments": arguments})
}

pub fn new_expr(callee: Json, arguments: Vec<Json>) -> Json {
    json!({"type": "NewExpression", "callee": callee, "arguments": arguments})
}

pub fn object_lit(props: Vec<(&str, Json)>) -> Json {
    let properties: Vec<Json> = props
        .into_iter()
        .map(|(key, value)| {
            json!({
                "type": "Property",
                "kind": "init",
                "key": ident(key),
                "value": value
            })
        })
        .collect();
    json!({"type": "ObjectExpression", "properties": properties})
}

pub fn array_lit(elements: Vec<Json>) -> Json {
    json!({"type": "ArrayExpression", "elements": elements})
}
