mod common;

use std::{path::Path, rc::Rc};

use capy_rkt::{
    load::expand::MemoryExpander,
    runtime::error::{ExpansionError, LoadError},
    Runtime,
};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn lib() -> serde_json::Value {
    module(
        "lib",
        vec![
            call("display", vec![quote(json!({"string": "lib"}))]),
            define("x", num(42)),
        ],
    )
}

/// A module requiring `/lib.rkt` and exporting `name` as `x` plus `offset`.
fn client(name: &str, offset: i64) -> serde_json::Value {
    module(
        name,
        vec![
            require(json!([["/lib.rkt"]])),
            define(name, call("+", vec![modvar("x", "/lib.rkt"), num(offset)])),
        ],
    )
}

fn run(runtime: &mut Runtime, file: &str) -> String {
    let module = runtime
        .load_file(Path::new(file))
        .unwrap_or_else(|e| panic!("loading {} failed: {}", file, e));
    runtime
        .run(&module)
        .unwrap_or_else(|e| panic!("running {} failed: {}", file, e))
        .to_string()
}

#[test]
fn shared_dependency_is_loaded_and_instantiated_once() {
    let mut expander = MemoryExpander::new();
    expander.insert("/lib.rkt", lib());
    expander.insert("/a.rkt", client("a", 1));
    expander.insert("/b.rkt", client("b", 2));
    expander.insert(
        "/main.rkt",
        module(
            "main",
            vec![
                require(json!([["/a.rkt"], ["/b.rkt"]])),
                call("list", vec![modvar("a", "/a.rkt"), modvar("b", "/b.rkt")]),
            ],
        ),
    );
    let expander = Rc::new(expander);
    let output = SharedOutput::default();
    let mut runtime = Runtime::new(Box::new(expander.clone()));
    runtime.interpreter().set_output(Box::new(output.clone()));

    assert_eq!(run(&mut runtime, "/main.rkt"), "(43 44)");
    assert_eq!(expander.expansions(), 4);
    assert_eq!(runtime.loader().modules().borrow().len(), 4);
    assert_eq!(output.contents(), "lib");
}

#[test]
fn self_require_terminates() {
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/main.rkt",
        module(
            "main",
            vec![require(json!([["/main.rkt"]])), num(1)],
        ),
    );
    let expander = Rc::new(expander);
    let mut runtime = Runtime::new(Box::new(expander.clone()));

    assert_eq!(run(&mut runtime, "/main.rkt"), "1");
    assert_eq!(expander.expansions(), 1);
}

#[test]
fn submodules_reach_their_enclosing_module() {
    let sub = module(
        "sub",
        vec![
            require(json!([[".."]])),
            define(
                "y",
                call(
                    "add1",
                    vec![json!({ "source-name": "x", "source-module": [".."] })],
                ),
            ),
        ],
    );
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/main.rkt",
        module(
            "main",
            vec![
                define("x", num(10)),
                sub,
                require(json!([[".", "sub"]])),
                json!({ "source-name": "y", "source-module": [".", "sub"] }),
            ],
        ),
    );
    let mut runtime = Runtime::new(Box::new(expander));

    assert_eq!(run(&mut runtime, "/main.rkt"), "11");
}

#[test]
fn unwritable_cache_falls_back_to_uncached_expansion() {
    let mut expander = MemoryExpander::new();
    expander.insert("/lib.rkt", lib());
    expander.insert("/a.rkt", client("a", 0));
    expander.set_read_only("/lib.rkt");
    let expander = Rc::new(expander);
    let mut runtime = Runtime::new(Box::new(expander.clone()));
    runtime.interpreter().set_output(Box::new(SharedOutput::default()));

    assert_eq!(run(&mut runtime, "/a.rkt"), "#<void>");
    assert_eq!(expander.uncached_expansions(), 1);
    assert_eq!(expander.expansions(), 2);
}

#[test]
fn missing_dependency_is_an_expansion_error() {
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/main.rkt",
        module("main", vec![require(json!([["/missing.rkt"]]))]),
    );
    let runtime = Runtime::new(Box::new(expander));

    let err = runtime.load_file(Path::new("/main.rkt")).unwrap_err();
    assert!(
        matches!(err, LoadError::Expansion(ExpansionError::NoOutput { .. })),
        "{}",
        err
    );
}

#[test]
fn failed_load_is_reported_again() {
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/main.rkt",
        module("main", vec![require(json!([["/missing.rkt"]]))]),
    );
    let runtime = Runtime::new(Box::new(expander));

    let first = runtime.load_file(Path::new("/main.rkt")).unwrap_err();
    assert!(matches!(first, LoadError::Expansion(_)), "{}", first);
    assert_eq!(runtime.loader().modules().borrow().current_mod(), None);

    let again = runtime.load_file(Path::new("/main.rkt")).unwrap_err();
    match again {
        LoadError::Failed { file, error } => {
            assert_eq!(file, "/main.rkt");
            assert_eq!(error, first.to_string());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn assignments_are_visible_to_importing_modules() {
    let counter = || modvar("counter", "/lib.rkt");
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/lib.rkt",
        module(
            "lib",
            vec![
                define("counter", num(0)),
                define(
                    "inc!",
                    lambda(&[], vec![set(counter(), call("add1", vec![counter()]))]),
                ),
            ],
        ),
    );
    expander.insert(
        "/main.rkt",
        module(
            "main",
            vec![
                require(json!([["/lib.rkt"]])),
                define("show", lambda(&[], vec![counter()])),
                define("a", app(modvar("show", "/main.rkt"), vec![])),
                app(modvar("inc!", "/lib.rkt"), vec![]),
                call(
                    "list",
                    vec![
                        modvar("a", "/main.rkt"),
                        app(modvar("show", "/main.rkt"), vec![]),
                    ],
                ),
            ],
        ),
    );
    let mut runtime = Runtime::new(Box::new(expander));

    assert_eq!(run(&mut runtime, "/main.rkt"), "(0 1)");
}

#[test]
fn assignment_under_a_same_named_parameter_is_seen() {
    let x = || modvar("x", "/main.rkt");
    let mut expander = MemoryExpander::new();
    expander.insert(
        "/main.rkt",
        module(
            "main",
            vec![
                define("x", num(0)),
                define("get", lambda(&[], vec![x()])),
                define("g", lambda(&["x"], vec![set(x(), num(5))])),
                define("a", app(modvar("get", "/main.rkt"), vec![])),
                app(modvar("g", "/main.rkt"), vec![num(1)]),
                call(
                    "list",
                    vec![
                        modvar("a", "/main.rkt"),
                        app(modvar("get", "/main.rkt"), vec![]),
                    ],
                ),
            ],
        ),
    );
    let mut runtime = Runtime::new(Box::new(expander));

    assert_eq!(run(&mut runtime, "/main.rkt"), "(0 5)");
}

#[test]
fn malformed_module_is_a_structural_error() {
    let runtime = Runtime::new(Box::new(MemoryExpander::new()));
    let err = runtime
        .load_json(&json!({ "module-name": "m" }), "/m.rkt")
        .unwrap_err();
    assert!(matches!(err, LoadError::Structural(_)), "{}", err);
}

#[test]
fn preexpanded_json_runs_without_an_expander() {
    let mut runtime = Runtime::new(Box::new(MemoryExpander::new()));
    let tree = module(
        "m",
        vec![
            define("twice", lambda(&["f", "v"], vec![app(lex("f"), vec![app(lex("f"), vec![lex("v")])])])),
            app(
                modvar("twice", "/m.rkt"),
                vec![prim("add1"), num(5)],
            ),
        ],
    );
    let module = runtime.load_json(&tree, "/m.rkt").unwrap();
    assert_eq!(runtime.run(&module).unwrap().to_string(), "7");
}
