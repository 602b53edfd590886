mod common;

use capy_rkt::{
    compiler::tree_il::NodeKind,
    load::expand::MemoryExpander,
    runtime::error::Error,
    Runtime,
};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value as Json};

fn runtime() -> Runtime {
    Runtime::new(Box::new(MemoryExpander::new()))
}

fn eval(json: Json) -> String {
    runtime()
        .eval_json(&json)
        .unwrap_or_else(|e| panic!("evaluation failed: {}", e))
        .to_string()
}

fn countdown(count: i64) -> Json {
    letrec(
        vec![(
            "loop",
            lambda(
                &["n"],
                vec![if_(
                    call("zero?", vec![lex("n")]),
                    sym("done"),
                    app(lex("loop"), vec![call("sub1", vec![lex("n")])]),
                )],
            ),
        )],
        vec![app(lex("loop"), vec![num(count)])],
    )
}

#[test]
fn literals_evaluate_to_themselves() {
    assert_eq!(eval(num(42)), "42");
    assert_eq!(eval(quote(json!([1, 2, 3]))), "(1 2 3)");
    assert_eq!(eval(quote(json!({"vector": [true, false]}))), "#(#t #f)");
    assert_eq!(eval(sym("hello")), "hello");
}

#[test]
fn arithmetic_and_conditionals() {
    assert_eq!(eval(call("+", vec![num(1), num(2), num(3)])), "6");
    assert_eq!(
        eval(if_(call("<", vec![num(1), num(2)]), sym("yes"), sym("no"))),
        "yes"
    );
    assert_eq!(
        eval(call("*", vec![num(99999999999), num(99999999999)])),
        "9999999999800000000001"
    );
}

#[test]
fn closures_share_one_cell() {
    let program = let_(
        vec![("n", num(0))],
        vec![let_(
            vec![
                ("get", lambda(&[], vec![lex("n")])),
                ("put", rest_lambda("v", vec![set(lex("n"), call("car", vec![lex("v")]))])),
            ],
            vec![app(lex("put"), vec![num(5)]), app(lex("get"), vec![])],
        )],
    );
    assert_eq!(eval(program), "5");
}

#[test]
fn constant_bindings_are_substituted() {
    let rt = runtime();
    let ast = rt
        .loader()
        .load_expression(&let_(vec![("a", num(1))], vec![lex("a")]))
        .unwrap();
    assert!(matches!(ast.kind, NodeKind::Quote(_)), "{}", ast);
}

#[test]
fn empty_let_is_its_body() {
    let rt = runtime();
    let ast = rt
        .loader()
        .load_expression(&let_(vec![], vec![num(7)]))
        .unwrap();
    assert!(matches!(ast.kind, NodeKind::Quote(_)), "{}", ast);
    assert_eq!(eval(let_(vec![], vec![num(7)])), "7");
}

#[test]
fn variable_reference_keeps_a_constant_binding() {
    let program = let_(
        vec![("a", num(1))],
        vec![json!({ "variable-reference": lex("a") })],
    );
    assert_eq!(eval(program), "#<variable-reference:a>");
}

#[test]
fn recursive_and_mutually_recursive_letrec() {
    let fact = letrec(
        vec![(
            "fact",
            lambda(
                &["n"],
                vec![if_(
                    call("zero?", vec![lex("n")]),
                    num(1),
                    call(
                        "*",
                        vec![
                            lex("n"),
                            app(lex("fact"), vec![call("sub1", vec![lex("n")])]),
                        ],
                    ),
                )],
            ),
        )],
        vec![app(lex("fact"), vec![num(20)])],
    );
    assert_eq!(eval(fact), "2432902008176640000");

    let parity = |other: &str, base: bool| {
        lambda(
            &["n"],
            vec![if_(
                call("zero?", vec![lex("n")]),
                quote(json!(base)),
                app(lex(other), vec![call("sub1", vec![lex("n")])]),
            )],
        )
    };
    let program = letrec(
        vec![
            ("even?", parity("odd?", true)),
            ("odd?", parity("even?", false)),
        ],
        vec![app(lex("even?"), vec![num(1001)])],
    );
    assert_eq!(eval(program), "#f");
}

#[test]
fn tail_calls_do_not_grow_the_continuation() {
    let mut rt = runtime();
    rt.eval_json(&countdown(10)).unwrap();
    let short = rt.interpreter().stats().max_depth;

    rt.interpreter().reset_stats();
    assert_eq!(rt.eval_json(&countdown(200_000)).unwrap().to_string(), "done");
    assert_eq!(rt.interpreter().stats().max_depth, short);
}

#[test]
fn escaping_with_call_cc() {
    let program = call(
        "+",
        vec![
            num(1),
            call(
                "call/cc",
                vec![lambda(
                    &["k"],
                    vec![call("+", vec![num(100), app(lex("k"), vec![num(2)])])],
                )],
            ),
        ],
    );
    assert_eq!(eval(program), "3");
}

#[test]
fn continuation_marks_follow_the_dynamic_extent() {
    let first = |key: &str| call("continuation-mark-set-first", vec![quote(json!(false)), sym(key)]);
    let program = wcm(
        sym("color"),
        sym("red"),
        call(
            "list",
            vec![
                first("color"),
                wcm(sym("color"), sym("blue"), first("color")),
            ],
        ),
    );
    assert_eq!(eval(program), "(red blue)");
}

#[test]
fn handlers_receive_raised_values() {
    let program = call(
        "call-with-error-handler",
        vec![
            rest_lambda("e", vec![call("list", vec![sym("caught"), call("car", vec![lex("e")])])]),
            lambda(&[], vec![call("raise", vec![sym("boom")])]),
        ],
    );
    assert_eq!(eval(program), "(caught boom)");
}

#[test]
fn unhandled_errors_reach_the_caller() {
    let err = runtime()
        .eval_json(&call("car", vec![num(1)]))
        .unwrap_err();
    match err {
        Error::Runtime(err) => assert!(err.message.starts_with("car: contract violation")),
        Error::Load(err) => panic!("unexpected load error: {}", err),
    }

    let err = runtime()
        .eval_json(&json!({ "unknown-form": 1 }))
        .unwrap_err();
    assert!(matches!(err, Error::Load(_)));
}

#[test]
fn display_writes_to_the_interpreter_output() {
    let output = SharedOutput::default();
    let mut rt = runtime();
    rt.interpreter().set_output(Box::new(output.clone()));
    rt.eval_json(&begin(vec![
        call("display", vec![quote(json!({"string": "hi"}))]),
        call("newline", vec![]),
        call("write", vec![quote(json!({"string": "hi"}))]),
    ]))
    .unwrap();
    assert_eq!(output.contents(), "hi\n\"hi\"");
}
