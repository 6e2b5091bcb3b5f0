//! Integration tests for the step engine: evaluation order, control flow,
//! scoping, and the user-error channel.

mod common;

use common::*;
use serde_json::json;

use burrow_vm::ClassTag;

#[test]
fn arithmetic_expression() {
    // (3 + 12 / 4) * (10 - 3)
    let prog = program(vec![expr_stmt(bin(
        "*",
        bin("+", num(3.0), bin("/", num(12.0), num(4.0))),
        bin("-", num(10.0), num(3.0)),
    ))]);
    assert_eq!(eval_fresh(&prog).to_number(), 42.0);
}

#[test]
fn variable_declaration_and_assignment() {
    let prog = program(vec![
        var_decl("x", Some(num(0.0))),
        expr_stmt(assign("=", ident("x"), num(44.0))),
        expr_stmt(ident("x")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 44.0);
}

#[test]
fn object_literal_shape() {
    let prog = program(vec![expr_stmt(object_lit(vec![
        ("foo", str_lit("bar")),
        ("answer", num(42.0)),
    ]))]);
    let (mut interp, _clock) = world();
    let value = eval(&mut interp, &prog);
    let obj = value.as_object().expect("an object");
    let borrowed = obj.borrow();
    assert_eq!(borrowed.prop_count(), 2);
    assert_eq!(borrowed.own_keys(), vec!["foo", "answer"]);
    assert_eq!(borrowed.own_value("foo").unwrap().to_js_string(), "bar");
    assert_eq!(borrowed.own_value("answer").unwrap().to_number(), 42.0);
    let proto = borrowed.proto().expect("has a prototype");
    assert!(proto.ptr_eq(&interp.builtins().object_proto));
}

#[test]
fn string_concatenation_coercion() {
    let prog = program(vec![expr_stmt(bin(
        "+",
        bin("+", num(1.0), num(2.0)),
        str_lit("3"),
    ))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "33");
}

#[test]
fn loose_and_strict_equality() {
    let prog = program(vec![expr_stmt(array_lit(vec![
        bin("==", num(1.0), str_lit("1")),
        bin("===", num(1.0), str_lit("1")),
        bin("==", null_lit(), ident("undefined")),
        bin("!=", num(0.0), null_lit()),
    ]))]);
    let (mut interp, _clock) = world();
    let arr = eval(&mut interp, &prog);
    let arr = arr.as_object().unwrap().borrow().own_value("length").unwrap();
    assert_eq!(arr.to_number(), 4.0);
    // Re-run and inspect each element.
    let prog = program_join();
    assert_eq!(eval_fresh(&prog).to_js_string(), "true,false,true,true");
}

fn program_join() -> serde_json::Value {
    program(vec![
        var_decl(
            "r",
            Some(array_lit(vec![
                bin("==", num(1.0), str_lit("1")),
                bin("===", num(1.0), str_lit("1")),
                bin("==", null_lit(), ident("undefined")),
                bin("!=", num(0.0), null_lit()),
            ])),
        ),
        expr_stmt(call(member(ident("r"), "join"), vec![str_lit(",")])),
    ])
}

#[test]
fn typeof_unresolved_identifier_does_not_throw() {
    let prog = program(vec![expr_stmt(unary("typeof", ident("neverDeclared")))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "undefined");
}

#[test]
fn unresolved_read_throws_reference_error() {
    let prog = program(vec![expr_stmt(ident("neverDeclared"))]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    let (name, message) = error_parts(&error);
    assert_eq!(name, "ReferenceError");
    assert_eq!(message, "neverDeclared is not defined");
}

#[test]
fn unresolved_assignment_throws_by_default() {
    let prog = program(vec![expr_stmt(assign("=", ident("ghost"), num(1.0)))]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    assert_eq!(error_parts(&error).0, "ReferenceError");
}

#[test]
fn short_circuit_skips_right_operand() {
    let prog = program(vec![
        var_decl("called", Some(bool_lit(false))),
        func_decl(
            "t",
            vec![],
            vec![
                expr_stmt(assign("=", ident("called"), bool_lit(true))),
                ret(Some(bool_lit(true))),
            ],
        ),
        expr_stmt(logical("&&", bool_lit(false), call(ident("t"), vec![]))),
        expr_stmt(ident("called")),
    ]);
    assert!(!eval_fresh(&prog).to_boolean());

    let prog = program(vec![
        var_decl("called", Some(bool_lit(false))),
        func_decl(
            "t",
            vec![],
            vec![
                expr_stmt(assign("=", ident("called"), bool_lit(true))),
                ret(Some(bool_lit(true))),
            ],
        ),
        expr_stmt(logical("||", bool_lit(true), call(ident("t"), vec![]))),
        expr_stmt(ident("called")),
    ]);
    assert!(!eval_fresh(&prog).to_boolean());
}

#[test]
fn hoisting_makes_declarations_visible_early() {
    let prog = program(vec![
        var_decl("seen", Some(unary("typeof", ident("x")))),
        var_decl("x", Some(num(5.0))),
        expr_stmt(ident("seen")),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "undefined");
}

#[test]
fn hoisted_functions_support_mutual_recursion() {
    let prog = program(vec![
        var_decl("result", Some(call(ident("g"), vec![]))),
        func_decl("g", vec![], vec![ret(Some(call(ident("h"), vec![])))]),
        func_decl("h", vec![], vec![ret(Some(num(7.0)))]),
        expr_stmt(ident("result")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 7.0);
}

#[test]
fn hoisting_descends_into_nested_statements() {
    // Declarations inside loops and branches are visible up front.
    let prog = program(vec![
        var_decl("kinds", Some(array_lit(vec![
            unary("typeof", ident("a")),
            unary("typeof", ident("b")),
        ]))),
        if_stmt(bool_lit(false), block(vec![var_decl("a", Some(num(1.0)))]), None),
        while_stmt(bool_lit(false), block(vec![var_decl("b", Some(num(2.0)))])),
        expr_stmt(call(member(ident("kinds"), "join"), vec![str_lit(",")])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "undefined,undefined");
}

#[test]
fn closures_capture_their_scope() {
    let prog = program(vec![
        func_decl(
            "makeCounter",
            vec![],
            vec![
                var_decl("n", Some(num(0.0))),
                ret(Some(func_expr(
                    vec![],
                    vec![
                        expr_stmt(assign("=", ident("n"), bin("+", ident("n"), num(1.0)))),
                        ret(Some(ident("n"))),
                    ],
                ))),
            ],
        ),
        var_decl("c", Some(call(ident("makeCounter"), vec![]))),
        expr_stmt(call(ident("c"), vec![])),
        expr_stmt(call(ident("c"), vec![])),
        expr_stmt(call(ident("c"), vec![])),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 3.0);
}

#[test]
fn arguments_object_is_populated() {
    let prog = program(vec![
        func_decl(
            "f",
            vec![],
            vec![ret(Some(bin(
                "+",
                member(ident("arguments"), "length"),
                index(ident("arguments"), num(0.0)),
            )))],
        ),
        expr_stmt(call(ident("f"), vec![num(10.0), num(20.0)])),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 12.0);
}

#[test]
fn try_catch_receives_thrown_error() {
    let prog = program(vec![
        var_decl("msg", None),
        try_stmt(
            vec![expr_stmt(throw(new_expr(ident("Error"), vec![str_lit("boom")])))],
            Some(("e", vec![expr_stmt(assign(
                "=",
                ident("msg"),
                member(ident("e"), "message"),
            ))])),
            None,
        ),
        expr_stmt(ident("msg")),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "boom");
}

#[test]
fn finally_always_runs_and_can_override() {
    let prog = program(vec![
        var_decl("fin", Some(bool_lit(false))),
        func_decl(
            "f",
            vec![],
            vec![try_stmt(
                vec![ret(Some(num(1.0)))],
                None,
                Some(vec![expr_stmt(assign("=", ident("fin"), bool_lit(true)))]),
            )],
        ),
        var_decl("r", Some(call(ident("f"), vec![]))),
        expr_stmt(logical("&&", ident("fin"), ident("r"))),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 1.0);

    // A finally that returns overrides the try's completion.
    let prog = program(vec![
        func_decl(
            "g",
            vec![],
            vec![try_stmt(
                vec![ret(Some(num(1.0)))],
                None,
                Some(vec![ret(Some(num(2.0)))]),
            )],
        ),
        expr_stmt(call(ident("g"), vec![])),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 2.0);
}

#[test]
fn uncaught_throw_terminates_the_thread() {
    let prog = program(vec![
        expr_stmt(throw(new_expr(ident("TypeError"), vec![str_lit("bad")]))),
        expr_stmt(num(1.0)),
    ]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    let (name, message) = error_parts(&error);
    assert_eq!(name, "TypeError");
    assert_eq!(message, "bad");
}

#[test]
fn switch_matches_and_falls_through() {
    let prog = program(vec![
        var_decl("r", Some(array_lit(vec![]))),
        switch_stmt(
            num(2.0),
            vec![
                case(Some(num(1.0)), vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![num(1.0)],
                ))]),
                case(Some(num(2.0)), vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![num(2.0)],
                ))]),
                case(Some(num(3.0)), vec![
                    expr_stmt(call(member(ident("r"), "push"), vec![num(3.0)])),
                    brk(None),
                ]),
                case(None, vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![num(5.0)],
                ))]),
            ],
        ),
        expr_stmt(call(member(ident("r"), "join"), vec![str_lit(",")])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "2,3");
}

#[test]
fn switch_uses_default_when_nothing_matches() {
    let prog = program(vec![
        var_decl("r", Some(array_lit(vec![]))),
        switch_stmt(
            num(9.0),
            vec![
                case(Some(num(1.0)), vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![num(1.0)],
                ))]),
                case(None, vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![str_lit("default")],
                ))]),
                case(Some(num(2.0)), vec![expr_stmt(call(
                    member(ident("r"), "push"),
                    vec![num(2.0)],
                ))]),
            ],
        ),
        expr_stmt(call(member(ident("r"), "join"), vec![str_lit(",")])),
    ]);
    // Fallthrough continues past the default clause.
    assert_eq!(eval_fresh(&prog).to_js_string(), "default,2");
}

#[test]
fn labeled_break_exits_outer_loop() {
    let prog = program(vec![
        var_decl("n", Some(num(0.0))),
        labeled(
            "outer",
            while_stmt(
                bool_lit(true),
                block(vec![while_stmt(
                    bool_lit(true),
                    block(vec![
                        expr_stmt(update("++", false, ident("n"))),
                        brk(Some("outer")),
                    ]),
                )]),
            ),
        ),
        expr_stmt(ident("n")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 1.0);
}

#[test]
fn labeled_continue_advances_outer_loop() {
    // Count outer iterations while skipping the inner loop body.
    let prog = program(vec![
        var_decl("count", Some(num(0.0))),
        var_decl("i", Some(num(0.0))),
        labeled(
            "outer",
            while_stmt(
                bin("<", ident("i"), num(3.0)),
                block(vec![
                    expr_stmt(update("++", false, ident("i"))),
                    while_stmt(
                        bool_lit(true),
                        block(vec![
                            expr_stmt(update("++", false, ident("count"))),
                            cont(Some("outer")),
                        ]),
                    ),
                ]),
            ),
        ),
        expr_stmt(ident("count")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 3.0);
}

#[test]
fn for_loop_accumulates() {
    let prog = program(vec![
        var_decl("sum", Some(num(0.0))),
        for_stmt(
            Some(var_decl("i", Some(num(0.0)))),
            Some(bin("<", ident("i"), num(10.0))),
            Some(update("++", false, ident("i"))),
            block(vec![expr_stmt(assign(
                "+=",
                ident("sum"),
                ident("i"),
            ))]),
        ),
        expr_stmt(ident("sum")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 45.0);
}

#[test]
fn do_while_runs_at_least_once() {
    let prog = program(vec![
        var_decl("n", Some(num(0.0))),
        do_while(
            block(vec![expr_stmt(update("++", false, ident("n")))]),
            bool_lit(false),
        ),
        expr_stmt(ident("n")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 1.0);
}

#[test]
fn for_in_visits_enumerable_keys_in_order() {
    let prog = program(vec![
        var_decl(
            "o",
            Some(object_lit(vec![("a", num(1.0)), ("b", num(2.0)), ("c", num(3.0))])),
        ),
        var_decl("ks", Some(array_lit(vec![]))),
        for_in(
            var_decl("k", None),
            ident("o"),
            block(vec![expr_stmt(call(
                member(ident("ks"), "push"),
                vec![ident("k")],
            ))]),
        ),
        expr_stmt(call(member(ident("ks"), "join"), vec![str_lit(",")])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "a,b,c");
}

#[test]
fn update_and_compound_assignment() {
    let prog = program(vec![
        var_decl("i", Some(num(5.0))),
        expr_stmt(assign("+=", ident("i"), num(2.0))),
        expr_stmt(update("++", false, ident("i"))),
        expr_stmt(update("++", true, ident("i"))),
        expr_stmt(ident("i")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 9.0);

    // Postfix yields the old value, prefix the new one.
    let prog = program(vec![
        var_decl("i", Some(num(5.0))),
        var_decl("old", Some(update("++", false, ident("i")))),
        var_decl("new_", Some(update("++", true, ident("i")))),
        expr_stmt(array_lit_join(vec![ident("old"), ident("new_")])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "5,7");
}

fn array_lit_join(elements: Vec<serde_json::Value>) -> serde_json::Value {
    call(member(array_lit(elements), "join"), vec![str_lit(",")])
}

#[test]
fn member_update_on_objects() {
    let prog = program(vec![
        var_decl("o", Some(object_lit(vec![("n", num(1.0))]))),
        expr_stmt(update("++", false, member(ident("o"), "n"))),
        expr_stmt(assign("*=", member(ident("o"), "n"), num(10.0))),
        expr_stmt(member(ident("o"), "n")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 20.0);
}

#[test]
fn constructors_wire_prototypes() {
    let prog = program(vec![
        func_decl(
            "Dog",
            vec!["name"],
            vec![expr_stmt(assign(
                "=",
                member(this_expr(), "name"),
                ident("name"),
            ))],
        ),
        var_decl("d", Some(new_expr(ident("Dog"), vec![str_lit("rex")]))),
        expr_stmt(array_lit_join(vec![
            member(ident("d"), "name"),
            bin("instanceof", ident("d"), ident("Dog")),
        ])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "rex,true");
}

#[test]
fn constructor_returning_object_overrides_instance() {
    let prog = program(vec![
        func_decl(
            "F",
            vec![],
            vec![ret(Some(object_lit(vec![("tag", str_lit("override"))])))],
        ),
        expr_stmt(member(new_expr(ident("F"), vec![]), "tag")),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "override");
}

#[test]
fn delete_and_in_operators() {
    let prog = program(vec![
        var_decl("o", Some(object_lit(vec![("a", num(1.0)), ("b", num(2.0))]))),
        expr_stmt(unary("delete", member(ident("o"), "a"))),
        expr_stmt(array_lit_join(vec![
            bin("in", str_lit("a"), ident("o")),
            bin("in", str_lit("b"), ident("o")),
            bin("===", member(ident("o"), "a"), ident("undefined")),
        ])),
    ]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "false,true,true");
}

#[test]
fn conditional_and_sequence_expressions() {
    let prog = program(vec![expr_stmt(sequence(vec![
        num(1.0),
        conditional(bin(">", num(2.0), num(1.0)), str_lit("yes"), str_lit("no")),
    ]))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "yes");
}

#[test]
fn string_primitives_expose_length_and_indexing() {
    let prog = program(vec![expr_stmt(array_lit_join(vec![
        member(str_lit("hello"), "length"),
        index(str_lit("abc"), num(1.0)),
    ]))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "5,b");
}

#[test]
fn array_length_tracks_indices() {
    let prog = program(vec![
        var_decl("a", Some(array_lit(vec![num(1.0)]))),
        expr_stmt(assign("=", index(ident("a"), num(5.0)), num(9.0))),
        expr_stmt(member(ident("a"), "length")),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 6.0);
}

#[test]
fn deep_recursion_raises_range_error() {
    let prog = program(vec![
        func_decl("f", vec![], vec![ret(Some(call(ident("f"), vec![])))]),
        expr_stmt(call(ident("f"), vec![])),
    ]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    let (name, message) = error_parts(&error);
    assert_eq!(name, "RangeError");
    assert_eq!(message, "Maximum call stack size exceeded");
}

#[test]
fn calling_a_non_function_raises_type_error() {
    let prog = program(vec![
        var_decl("x", Some(num(4.0))),
        expr_stmt(call(ident("x"), vec![])),
    ]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    assert_eq!(error_parts(&error).0, "TypeError");
}

#[test]
fn member_access_on_null_raises_type_error() {
    let prog = program(vec![expr_stmt(member(null_lit(), "anything"))]);
    let (mut interp, _clock) = world();
    let error = eval_uncaught(&mut interp, &prog);
    assert_eq!(error_parts(&error).0, "TypeError");
}

#[test]
fn special_number_arithmetic() {
    let prog = program(vec![expr_stmt(array_lit_join(vec![
        bin("/", num(1.0), num(0.0)),
        bin("/", num(-1.0), num(0.0)),
        bin("===", unary("-", num(0.0)), num(0.0)),
        unary("+", str_lit("nope")),
    ]))]);
    assert_eq!(
        eval_fresh(&prog).to_js_string(),
        "Infinity,-Infinity,true,NaN"
    );
}

#[test]
fn bitwise_and_shift_operators() {
    let prog = program(vec![expr_stmt(array_lit_join(vec![
        bin("&", num(6.0), num(3.0)),
        bin("|", num(6.0), num(3.0)),
        bin("^", num(6.0), num(3.0)),
        bin("<<", num(1.0), num(4.0)),
        bin(">>", num(-8.0), num(1.0)),
        bin(">>>", num(-1.0), num(28.0)),
    ]))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "2,7,5,16,-4,15");
}

#[test]
fn baseline_library_smoke() {
    let prog = program(vec![expr_stmt(array_lit_join(vec![
        call(member(ident("Math"), "floor"), vec![num(2.9)]),
        call(ident("parseInt"), vec![str_lit("42px")]),
        call(ident("String"), vec![num(7.0)]),
        call(ident("isNaN"), vec![str_lit("x")]),
        call(member(ident("Object"), "keys"), vec![object_lit(vec![("k", num(1.0))])]),
    ]))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "2,42,7,true,k");
}

#[test]
fn class_tags_via_to_string() {
    let prog = program(vec![expr_stmt(call(
        member(object_lit(vec![]), "toString"),
        vec![],
    ))]);
    assert_eq!(eval_fresh(&prog).to_js_string(), "[object Object]");
}

#[test]
fn literal_regex_builds_a_regexp_object() {
    let prog = json!({
        "type": "Program",
        "body": [{
            "type": "ExpressionStatement",
            "expression": {"type": "Literal", "regex": {"pattern": "a+", "flags": "g"}}
        }]
    });
    let (mut interp, _clock) = world();
    let value = eval(&mut interp, &prog);
    let obj = value.as_object().expect("a regexp object");
    assert_eq!(obj.borrow().class(), ClassTag::RegExp);
    assert_eq!(value.to_js_string(), "/a+/g");
}

#[test]
fn completion_value_is_last_expression() {
    let prog = program(vec![
        expr_stmt(num(1.0)),
        if_stmt(bool_lit(true), block(vec![expr_stmt(num(2.0))]), None),
    ]);
    assert_eq!(eval_fresh(&prog).to_number(), 2.0);
}
