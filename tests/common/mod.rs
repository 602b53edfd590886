//! Builders for expander output.
#![allow(dead_code)]

use std::{cell::RefCell, io::Write, rc::Rc};

use serde_json::{json, Value as Json};

pub fn prim(name: &str) -> Json {
    json!({ "source-name": name })
}

pub fn lex(name: &str) -> Json {
    json!({ "lexical": name })
}

pub fn top(name: &str) -> Json {
    json!({ "toplevel": name })
}

/// A variable defined in the module at `file`.
pub fn modvar(name: &str, file: &str) -> Json {
    json!({ "source-name": name, "source-module": [file] })
}

pub fn num(n: i64) -> Json {
    json!({ "quote": { "number": { "integer": n.to_string() } } })
}

pub fn quote(datum: Json) -> Json {
    json!({ "quote": datum })
}

pub fn sym(name: &str) -> Json {
    json!({ "quote": { "toplevel": name } })
}

pub fn app(rator: Json, rands: Vec<Json>) -> Json {
    json!({ "operator": rator, "operands": rands })
}

pub fn call(name: &str, rands: Vec<Json>) -> Json {
    app(prim(name), rands)
}

pub fn lambda(formals: &[&str], body: Vec<Json>) -> Json {
    let formals: Vec<Json> = formals.iter().map(|f| lex(f)).collect();
    json!({ "lambda": formals, "body": body })
}

/// A procedure taking any number of arguments as the list `rest`.
pub fn rest_lambda(rest: &str, body: Vec<Json>) -> Json {
    json!({ "lambda": lex(rest), "body": body })
}

pub fn if_(test: Json, then: Json, els: Json) -> Json {
    json!({ "test": test, "then": then, "else": els })
}

/// Single-value bindings `[[name], rhs]`.
fn bindings(bindings: Vec<(&str, Json)>) -> Json {
    Json::Array(
        bindings
            .into_iter()
            .map(|(name, rhs)| json!([[name], rhs]))
            .collect(),
    )
}

pub fn let_(binds: Vec<(&str, Json)>, body: Vec<Json>) -> Json {
    json!({ "let-bindings": bindings(binds), "let-body": body })
}

pub fn letrec(binds: Vec<(&str, Json)>, body: Vec<Json>) -> Json {
    json!({ "letrec-bindings": bindings(binds), "letrec-body": body })
}

pub fn begin(forms: Vec<Json>) -> Json {
    let mut array = vec![prim("begin")];
    array.extend(forms);
    Json::Array(array)
}

pub fn set(target: Json, rhs: Json) -> Json {
    json!([prim("set!"), target, rhs])
}

pub fn define(name: &str, rhs: Json) -> Json {
    json!({ "define-values": [name], "define-values-body": rhs })
}

/// `paths` is an array of module paths, each an array of segments.
pub fn require(paths: Json) -> Json {
    json!({ "require": paths })
}

pub fn wcm(key: Json, value: Json, body: Json) -> Json {
    json!({ "wcm-key": key, "wcm-val": value, "wcm-body": body })
}

pub fn module(name: &str, body: Vec<Json>) -> Json {
    json!({ "module-name": name, "body-forms": body })
}

/// Output sink that can be read back after the interpreter wrote to it.
#[derive(Clone, Default)]
pub struct SharedOutput(pub Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
