//! The primitive table and the core primitives.
//!
//! Primitives are registered once into a process wide table keyed by name.
//! Simple primitives compute a value from their arguments; control primitives
//! get the interpreter and the current continuation and return the next
//! evaluation step.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use once_cell::sync::Lazy;

use super::{
    cont::{Cont, ContKind},
    error::{arity_error, wrong_contract, RuntimeError, ScmResult},
    number::Number,
    print::display_string,
    symbol::Symbol,
    value::{self, Value},
    vm::{Interpreter, Step},
};

#[derive(Clone, Copy)]
pub enum Subr {
    Simple(fn(&[Value]) -> ScmResult),
    Control(fn(&mut Interpreter, Vec<Value>, Rc<Cont>) -> ScmResult<Step>),
}

pub struct Primitive {
    pub name: &'static str,
    pub nreq: usize,
    pub nopt: usize,
    pub rest: bool,
    pub subr: Subr,
}

impl Primitive {
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.nreq && (self.rest || argc <= self.nreq + self.nopt)
    }

    fn arity_string(&self) -> String {
        if self.rest {
            format!("at least {}", self.nreq)
        } else if self.nopt > 0 {
            format!("{} to {}", self.nreq, self.nreq + self.nopt)
        } else {
            self.nreq.to_string()
        }
    }

    pub fn invoke(
        &'static self,
        vm: &mut Interpreter,
        args: Vec<Value>,
        k: Rc<Cont>,
    ) -> ScmResult<Step> {
        if !self.accepts(args.len()) {
            return arity_error(self.name, &self.arity_string(), args.len());
        }
        match self.subr {
            Subr::Simple(f) => Ok(Step::Return(f(&args)?, k)),
            Subr::Control(f) => f(vm, args, k),
        }
    }
}

#[derive(Default)]
pub struct PrimitiveTable {
    table: HashMap<&'static str, Primitive>,
}

impl PrimitiveTable {
    pub fn define_subr(
        &mut self,
        name: &'static str,
        nreq: usize,
        nopt: usize,
        rest: bool,
        subr: Subr,
    ) {
        self.table.insert(
            name,
            Primitive {
                name,
                nreq,
                nopt,
                rest,
                subr,
            },
        );
    }
}

static PRIMITIVES: Lazy<PrimitiveTable> = Lazy::new(|| {
    let mut table = PrimitiveTable::default();
    init(&mut table);
    super::subr_arith::init(&mut table);
    table
});

pub fn lookup_primitive(name: &str) -> Option<&'static Primitive> {
    Lazy::force(&PRIMITIVES).table.get(name)
}

fn cons(args: &[Value]) -> ScmResult {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn car(args: &[Value]) -> ScmResult {
    match args[0].car() {
        Some(v) => Ok(v),
        None => wrong_contract("car", "pair?", 0, args),
    }
}

fn cdr(args: &[Value]) -> ScmResult {
    match args[0].cdr() {
        Some(v) => Ok(v),
        None => wrong_contract("cdr", "pair?", 0, args),
    }
}

fn list(args: &[Value]) -> ScmResult {
    Ok(Value::list(args.to_vec()))
}

fn length(args: &[Value]) -> ScmResult {
    match args[0].list_to_vec() {
        Some(items) => Ok(Value::fixnum(items.len() as i64)),
        None => wrong_contract("length", "list?", 0, args),
    }
}

fn reverse(args: &[Value]) -> ScmResult {
    match args[0].list_to_vec() {
        Some(mut items) => {
            items.reverse();
            Ok(Value::list(items))
        }
        None => wrong_contract("reverse", "list?", 0, args),
    }
}

fn null_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::Null).into())
}

fn pair_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::Pair(_)).into())
}

fn list_p(args: &[Value]) -> ScmResult {
    Ok(args[0].list_to_vec().is_some().into())
}

fn symbol_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::Symbol(_)).into())
}

fn string_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::String(_)).into())
}

fn boolean_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::Bool(_)).into())
}

fn procedure_p(args: &[Value]) -> ScmResult {
    Ok(args[0].is_procedure().into())
}

fn not(args: &[Value]) -> ScmResult {
    Ok((!args[0].is_true()).into())
}

fn eq_p(args: &[Value]) -> ScmResult {
    Ok(value::eq(&args[0], &args[1]).into())
}

fn eqv_p(args: &[Value]) -> ScmResult {
    Ok(value::eqv(&args[0], &args[1]).into())
}

fn equal_p(args: &[Value]) -> ScmResult {
    Ok(value::equal(&args[0], &args[1]).into())
}

fn void(_args: &[Value]) -> ScmResult {
    Ok(Value::Void)
}

fn vector(args: &[Value]) -> ScmResult {
    Ok(Value::vector(args.to_vec()))
}

fn make_vector(args: &[Value]) -> ScmResult {
    let size = index_arg("make-vector", args, 0)?;
    let fill = args.get(1).cloned().unwrap_or(Value::fixnum(0));
    Ok(Value::vector(vec![fill; size]))
}

fn index_arg(name: &str, args: &[Value], position: usize) -> ScmResult<usize> {
    match &args[position] {
        Value::Number(Number::Fixnum(n)) if *n >= 0 => Ok(*n as usize),
        _ => wrong_contract(name, "exact-nonnegative-integer?", position, args),
    }
}

fn vector_ref(args: &[Value]) -> ScmResult {
    let Value::Vector(v) = &args[0] else {
        return wrong_contract("vector-ref", "vector?", 0, args);
    };
    let index = index_arg("vector-ref", args, 1)?;
    let v = v.borrow();
    match v.get(index) {
        Some(x) => Ok(x.clone()),
        None => Err(RuntimeError::new(format!(
            "vector-ref: index is out of range\n  index: {}\n  valid range: [0, {}]",
            index,
            v.len() as i64 - 1
        ))),
    }
}

fn vector_set(args: &[Value]) -> ScmResult {
    let Value::Vector(v) = &args[0] else {
        return wrong_contract("vector-set!", "vector?", 0, args);
    };
    let index = index_arg("vector-set!", args, 1)?;
    let mut v = v.borrow_mut();
    let len = v.len();
    match v.get_mut(index) {
        Some(slot) => {
            *slot = args[2].clone();
            Ok(Value::Void)
        }
        None => Err(RuntimeError::new(format!(
            "vector-set!: index is out of range\n  index: {}\n  valid range: [0, {}]",
            index,
            len as i64 - 1
        ))),
    }
}

fn vector_length(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::Vector(v) => Ok(Value::fixnum(v.borrow().len() as i64)),
        _ => wrong_contract("vector-length", "vector?", 0, args),
    }
}

fn make_box(args: &[Value]) -> ScmResult {
    Ok(Value::Box(Rc::new(RefCell::new(args[0].clone()))))
}

fn unbox(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::Box(b) => Ok(b.borrow().clone()),
        _ => wrong_contract("unbox", "box?", 0, args),
    }
}

fn set_box(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::Box(b) => {
            *b.borrow_mut() = args[1].clone();
            Ok(Value::Void)
        }
        _ => wrong_contract("set-box!", "box?", 0, args),
    }
}

fn string_append(args: &[Value]) -> ScmResult {
    let mut result = String::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Value::String(s) => result.push_str(s),
            _ => return wrong_contract("string-append", "string?", i, args),
        }
    }
    Ok(Value::string(&result))
}

fn string_length(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::String(s) => Ok(Value::fixnum(s.chars().count() as i64)),
        _ => wrong_contract("string-length", "string?", 0, args),
    }
}

fn number_to_string(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::Number(n) => Ok(Value::string(&n.to_string())),
        _ => wrong_contract("number->string", "number?", 0, args),
    }
}

fn symbol_to_string(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::Symbol(s) => Ok(Value::string(s.as_str())),
        _ => wrong_contract("symbol->string", "symbol?", 0, args),
    }
}

fn string_to_symbol(args: &[Value]) -> ScmResult {
    match &args[0] {
        Value::String(s) => Ok(Value::Symbol(Symbol::intern(&**s))),
        _ => wrong_contract("string->symbol", "string?", 0, args),
    }
}

fn raise(args: &[Value]) -> ScmResult {
    Err(RuntimeError::raised(args[0].clone()))
}

/// `(error 'who "format" v ...)` or `(error "message" v ...)`.
fn error(args: &[Value]) -> ScmResult {
    let mut message = match &args[0] {
        Value::Symbol(who) => match args.get(1) {
            Some(Value::String(msg)) => format!("{}: {}", who, msg),
            _ => who.to_string(),
        },
        Value::String(msg) => msg.to_string(),
        _ => return wrong_contract("error", "(or/c symbol? string?)", 0, args),
    };
    let skip = if matches!((&args[0], args.get(1)), (Value::Symbol(_), Some(Value::String(_)))) {
        2
    } else {
        1
    };
    for arg in &args[skip..] {
        message.push(' ');
        message.push_str(&arg.to_string());
    }
    Err(RuntimeError::new(message))
}

fn display(vm: &mut Interpreter, args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    vm.write_output(&display_string(&args[0]))?;
    Ok(Step::Return(Value::Void, k))
}

fn write(vm: &mut Interpreter, args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    vm.write_output(&args[0].to_string())?;
    Ok(Step::Return(Value::Void, k))
}

fn newline(vm: &mut Interpreter, _args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    vm.write_output("\n")?;
    Ok(Step::Return(Value::Void, k))
}

fn apply(vm: &mut Interpreter, mut args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    let f = args.remove(0);
    if let Some(last) = args.pop() {
        match last.list_to_vec() {
            Some(rest) => args.extend(rest),
            None => return wrong_contract("apply", "list?", 0, &[last]),
        }
    }
    vm.apply(f, args, k)
}

fn values(_vm: &mut Interpreter, args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    Ok(Step::Return(Value::values(args), k))
}

fn call_with_values(vm: &mut Interpreter, mut args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    let consumer = args.pop().unwrap_or(Value::Void);
    let producer = args.pop().unwrap_or(Value::Void);
    vm.apply(producer, vec![], Cont::new(ContKind::CallWithValues { consumer }, k))
}

fn call_cc(vm: &mut Interpreter, mut args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
    let f = args.remove(0);
    vm.apply(f, vec![Value::Continuation(k.clone())], k)
}

/// `(call-with-error-handler handler thunk)`
fn call_with_error_handler(
    vm: &mut Interpreter,
    mut args: Vec<Value>,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    let thunk = args.pop().unwrap_or(Value::Void);
    let handler = args.pop().unwrap_or(Value::Void);
    if !handler.is_procedure() {
        return wrong_contract("call-with-error-handler", "procedure?", 0, &[handler, thunk]);
    }
    vm.apply(thunk, vec![], Cont::new(ContKind::Handler { handler }, k))
}

/// The continuation a mark set argument denotes. `#f` is the current one.
fn mark_set(name: &str, args: &[Value], k: &Rc<Cont>) -> ScmResult<Rc<Cont>> {
    match &args[0] {
        Value::Bool(false) => Ok(k.clone()),
        Value::Continuation(marks) => Ok(marks.clone()),
        _ => wrong_contract(name, "(or/c continuation-mark-set? #f)", 0, args),
    }
}

fn continuation_mark_set_first(
    _vm: &mut Interpreter,
    args: Vec<Value>,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    let marks = mark_set("continuation-mark-set-first", &args, &k)?;
    let value = Cont::first_mark(&marks, &args[1])
        .or_else(|| args.get(2).cloned())
        .unwrap_or(Value::Bool(false));
    Ok(Step::Return(value, k))
}

fn current_continuation_marks(
    _vm: &mut Interpreter,
    _args: Vec<Value>,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    Ok(Step::Return(Value::Continuation(k.clone()), k))
}

fn continuation_mark_set_to_list(
    _vm: &mut Interpreter,
    args: Vec<Value>,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    let marks = mark_set("continuation-mark-set->list", &args, &k)?;
    Ok(Step::Return(Value::list(Cont::marks(&marks, &args[1])), k))
}

pub(crate) fn init(table: &mut PrimitiveTable) {
    table.define_subr("cons", 2, 0, false, Subr::Simple(cons));
    table.define_subr("car", 1, 0, false, Subr::Simple(car));
    table.define_subr("cdr", 1, 0, false, Subr::Simple(cdr));
    table.define_subr("list", 0, 0, true, Subr::Simple(list));
    table.define_subr("length", 1, 0, false, Subr::Simple(length));
    table.define_subr("reverse", 1, 0, false, Subr::Simple(reverse));
    table.define_subr("null?", 1, 0, false, Subr::Simple(null_p));
    table.define_subr("pair?", 1, 0, false, Subr::Simple(pair_p));
    table.define_subr("list?", 1, 0, false, Subr::Simple(list_p));
    table.define_subr("symbol?", 1, 0, false, Subr::Simple(symbol_p));
    table.define_subr("string?", 1, 0, false, Subr::Simple(string_p));
    table.define_subr("boolean?", 1, 0, false, Subr::Simple(boolean_p));
    table.define_subr("procedure?", 1, 0, false, Subr::Simple(procedure_p));
    table.define_subr("not", 1, 0, false, Subr::Simple(not));
    table.define_subr("eq?", 2, 0, false, Subr::Simple(eq_p));
    table.define_subr("eqv?", 2, 0, false, Subr::Simple(eqv_p));
    table.define_subr("equal?", 2, 0, false, Subr::Simple(equal_p));
    table.define_subr("void", 0, 0, true, Subr::Simple(void));

    table.define_subr("vector", 0, 0, true, Subr::Simple(vector));
    table.define_subr("make-vector", 1, 1, false, Subr::Simple(make_vector));
    table.define_subr("vector-ref", 2, 0, false, Subr::Simple(vector_ref));
    table.define_subr("vector-set!", 3, 0, false, Subr::Simple(vector_set));
    table.define_subr("vector-length", 1, 0, false, Subr::Simple(vector_length));
    table.define_subr("box", 1, 0, false, Subr::Simple(make_box));
    table.define_subr("unbox", 1, 0, false, Subr::Simple(unbox));
    table.define_subr("set-box!", 2, 0, false, Subr::Simple(set_box));

    table.define_subr("string-append", 0, 0, true, Subr::Simple(string_append));
    table.define_subr("string-length", 1, 0, false, Subr::Simple(string_length));
    table.define_subr("number->string", 1, 0, false, Subr::Simple(number_to_string));
    table.define_subr("symbol->string", 1, 0, false, Subr::Simple(symbol_to_string));
    table.define_subr("string->symbol", 1, 0, false, Subr::Simple(string_to_symbol));

    table.define_subr("raise", 1, 0, false, Subr::Simple(raise));
    table.define_subr("error", 1, 0, true, Subr::Simple(error));
    table.define_subr("display", 1, 0, false, Subr::Control(display));
    table.define_subr("write", 1, 0, false, Subr::Control(write));
    table.define_subr("newline", 0, 0, false, Subr::Control(newline));

    table.define_subr("apply", 1, 0, true, Subr::Control(apply));
    table.define_subr("values", 0, 0, true, Subr::Control(values));
    table.define_subr("call-with-values", 2, 0, false, Subr::Control(call_with_values));
    table.define_subr("call/cc", 1, 0, false, Subr::Control(call_cc));
    table.define_subr(
        "call-with-current-continuation",
        1,
        0,
        false,
        Subr::Control(call_cc),
    );
    table.define_subr(
        "call-with-error-handler",
        2,
        0,
        false,
        Subr::Control(call_with_error_handler),
    );
    table.define_subr(
        "continuation-mark-set-first",
        2,
        1,
        false,
        Subr::Control(continuation_mark_set_first),
    );
    table.define_subr(
        "current-continuation-marks",
        0,
        0,
        false,
        Subr::Control(current_continuation_marks),
    );
    table.define_subr(
        "continuation-mark-set->list",
        2,
        0,
        false,
        Subr::Control(continuation_mark_set_to_list),
    );
}
