//! Runtime values.
//!
//! Immediate values are stored inline, everything else is reference counted.
//! Mutable heap objects (vectors, boxes, cells) use interior mutability since
//! evaluation is single threaded.

use std::{cell::RefCell, rc::Rc};

use super::{
    cont::Cont,
    environment::{Cell, Env},
    number::Number,
    subr_core::Primitive,
    symbol::Symbol,
};

#[derive(Clone)]
pub enum Value {
    Void,
    /// Contents of a letrec cell before its right-hand side has been evaluated.
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    Char(char),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Symbol(Symbol),
    Keyword(Symbol),
    Path(Rc<str>),
    Pair(Rc<(Value, Value)>),
    Vector(Rc<RefCell<Vec<Value>>>),
    Box(Rc<RefCell<Value>>),
    Hash(Rc<Vec<(Value, Value)>>),
    Prefab(Rc<Prefab>),
    Regexp(Rc<Regexp>),
    /// Heap box introduced by assignment conversion. Never visible to programs.
    Cell(Rc<Cell>),
    /// A closure is the frame it captured; the frame knows its code.
    Closure(Env),
    Primitive(&'static Primitive),
    Continuation(Rc<Cont>),
    Values(Rc<[Value]>),
    VariableReference(Rc<VariableReference>),
}

pub struct Prefab {
    pub key: Value,
    pub fields: Vec<Value>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegexpKind {
    Regexp,
    ByteRegexp,
    Pregexp,
    BytePregexp,
}

pub struct Regexp {
    pub kind: RegexpKind,
    pub source: String,
}

pub struct VariableReference {
    /// Name of the referenced variable, `None` for `(#%variable-reference)`.
    pub variable: Option<Symbol>,
    pub module: Option<String>,
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn symbol(s: &str) -> Value {
        Value::Symbol(Symbol::intern(s))
    }

    pub fn fixnum(n: i64) -> Value {
        Value::Number(Number::Fixnum(n))
    }

    pub fn flonum(f: f64) -> Value {
        Value::Number(Number::Flonum(f))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new((car, cdr)))
    }

    pub fn list(elements: Vec<Value>) -> Value {
        Self::improper(elements, Value::Null)
    }

    pub fn improper(elements: Vec<Value>, tail: Value) -> Value {
        elements
            .into_iter()
            .rev()
            .fold(tail, |acc, element| Value::cons(element, acc))
    }

    pub fn vector(elements: Vec<Value>) -> Value {
        Value::Vector(Rc::new(RefCell::new(elements)))
    }

    /// Packs results of `values`. A single value is returned as itself.
    pub fn values(mut values: Vec<Value>) -> Value {
        if values.len() == 1 {
            values.pop().unwrap_or(Value::Void)
        } else {
            Value::Values(Rc::from(values))
        }
    }

    /// Unpacks a value delivered to a multiple-value context.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Value::Values(values) => values.to_vec(),
            value => vec![value],
        }
    }

    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Primitive(_) | Value::Continuation(_)
        )
    }

    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn car(&self) -> Option<Value> {
        match self {
            Value::Pair(pair) => Some(pair.0.clone()),
            _ => None,
        }
    }

    pub fn cdr(&self) -> Option<Value> {
        match self {
            Value::Pair(pair) => Some(pair.1.clone()),
            _ => None,
        }
    }

    /// Collects a proper list into a vector, `None` if `self` is not a list.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut out = Vec::new();
        let mut cur = self.clone();
        loop {
            match cur {
                Value::Null => return Some(out),
                Value::Pair(pair) => {
                    out.push(pair.0.clone());
                    cur = pair.1.clone();
                }
                _ => return None,
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::Path(_) => "path",
            Value::Pair(_) => "pair",
            Value::Vector(_) => "vector",
            Value::Box(_) => "box",
            Value::Hash(_) => "hash",
            Value::Prefab(_) => "struct",
            Value::Regexp(_) => "regexp",
            Value::Cell(_) => "cell",
            Value::Closure(_) => "procedure",
            Value::Primitive(_) => "procedure",
            Value::Continuation(_) => "continuation",
            Value::Values(_) => "values",
            Value::VariableReference(_) => "variable-reference",
        }
    }
}

pub fn eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Void, Value::Void)
        | (Value::Undefined, Value::Undefined)
        | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Number(Number::Fixnum(x)), Value::Number(Number::Fixnum(y))) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) | (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::String(x), Value::String(y)) => Rc::ptr_eq(x, y),
        (Value::Bytes(x), Value::Bytes(y)) => Rc::ptr_eq(x, y),
        (Value::Path(x), Value::Path(y)) => Rc::ptr_eq(x, y),
        (Value::Pair(x), Value::Pair(y)) => Rc::ptr_eq(x, y),
        (Value::Vector(x), Value::Vector(y)) => Rc::ptr_eq(x, y),
        (Value::Box(x), Value::Box(y)) => Rc::ptr_eq(x, y),
        (Value::Hash(x), Value::Hash(y)) => Rc::ptr_eq(x, y),
        (Value::Prefab(x), Value::Prefab(y)) => Rc::ptr_eq(x, y),
        (Value::Regexp(x), Value::Regexp(y)) => Rc::ptr_eq(x, y),
        (Value::Cell(x), Value::Cell(y)) => Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Primitive(x), Value::Primitive(y)) => std::ptr::eq(*x, *y),
        (Value::Continuation(x), Value::Continuation(y)) => Rc::ptr_eq(x, y),
        (Value::VariableReference(x), Value::VariableReference(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

pub fn eqv(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x, y) {
            (Number::Flonum(x), Number::Flonum(y)) => x.to_bits() == y.to_bits(),
            _ => x == y,
        },
        _ => eq(a, b),
    }
}

pub fn equal(a: &Value, b: &Value) -> bool {
    let (mut a, mut b) = (a.clone(), b.clone());
    loop {
        if eqv(&a, &b) {
            return true;
        }

        match (&a, &b) {
            (Value::Pair(x), Value::Pair(y)) => {
                if !equal(&x.0, &y.0) {
                    return false;
                }
                let (next_a, next_b) = (x.1.clone(), y.1.clone());
                a = next_a;
                b = next_b;
            }
            (Value::Vector(x), Value::Vector(y)) => {
                let (x, y) = (x.borrow(), y.borrow());
                return x.len() == y.len() && x.iter().zip(y.iter()).all(|(x, y)| equal(x, y));
            }
            (Value::Box(x), Value::Box(y)) => return equal(&x.borrow(), &y.borrow()),
            (Value::String(x), Value::String(y)) => return x == y,
            (Value::Bytes(x), Value::Bytes(y)) => return x == y,
            (Value::Path(x), Value::Path(y)) => return x == y,
            (Value::Prefab(x), Value::Prefab(y)) => {
                return equal(&x.key, &y.key)
                    && x.fields.len() == y.fields.len()
                    && x.fields.iter().zip(y.fields.iter()).all(|(x, y)| equal(x, y));
            }
            (Value::Regexp(x), Value::Regexp(y)) => {
                return x.kind == y.kind && x.source == y.source;
            }
            _ => return false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_recurses_where_eq_does_not() {
        let a = Value::list(vec![Value::fixnum(1), Value::string("two")]);
        let b = Value::list(vec![Value::fixnum(1), Value::string("two")]);
        assert!(!eq(&a, &b));
        assert!(equal(&a, &b));
        assert!(eq(&a, &a.clone()));
    }

    #[test]
    fn eqv_distinguishes_exactness() {
        assert!(eqv(&Value::fixnum(3), &Value::fixnum(3)));
        assert!(!eqv(&Value::fixnum(3), &Value::flonum(3.0)));
        assert!(eqv(&Value::flonum(f64::NAN), &Value::flonum(f64::NAN)));
    }

    #[test]
    fn lists_round_trip_through_vectors() {
        let items = vec![Value::fixnum(1), Value::fixnum(2), Value::fixnum(3)];
        let list = Value::list(items.clone());
        let back = list.list_to_vec().unwrap();
        assert_eq!(back.len(), 3);
        assert!(Value::improper(items, Value::fixnum(4)).list_to_vec().is_none());
    }

    #[test]
    fn single_value_is_not_wrapped() {
        assert!(matches!(Value::values(vec![Value::Null]), Value::Null));
        assert!(matches!(Value::values(vec![]), Value::Values(v) if v.is_empty()));
    }
}
