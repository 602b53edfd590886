//! Runtime environments.
//!
//! A frame holds the slots of one lexical contour and a link to its parent.
//! Closures are frames too: a closure frame holds the captured values, knows
//! its code and has no parent. Frames are never mutated after construction;
//! assignments go through [`Cell`]s stored in the slots.

use std::{cell::RefCell, rc::Rc};

use crate::compiler::{env::Slot, tree_il::CaseLambda};

use super::{
    error::{RuntimeError, ScmResult},
    value::Value,
};

/// Heap box of a mutated variable.
pub struct Cell {
    value: RefCell<Value>,
}

impl Cell {
    pub fn new(value: Value) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }
}

pub type Env = Rc<Frame>;

pub struct Frame {
    slots: Box<[Value]>,
    parent: Option<Env>,
    code: Option<Rc<CaseLambda>>,
}

impl Frame {
    /// The empty frame module bodies are evaluated in.
    pub fn root() -> Env {
        Rc::new(Self {
            slots: Box::new([]),
            parent: None,
            code: None,
        })
    }

    pub fn new(slots: Vec<Value>, parent: Env) -> Env {
        Rc::new(Self {
            slots: slots.into_boxed_slice(),
            parent: Some(parent),
            code: None,
        })
    }

    pub fn closure(code: Rc<CaseLambda>, captured: Vec<Value>) -> Env {
        Rc::new(Self {
            slots: captured.into_boxed_slice(),
            parent: None,
            code: Some(code),
        })
    }

    pub fn code(&self) -> Option<&Rc<CaseLambda>> {
        self.code.as_ref()
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reads the slot at `slot`, following `slot.depth` parent links.
    ///
    /// The self slot of a recursive closure frame yields the closure itself.
    pub fn lookup(env: &Env, slot: Slot) -> ScmResult<Value> {
        let mut frame = env;
        for _ in 0..slot.depth {
            frame = frame
                .parent
                .as_ref()
                .ok_or_else(|| RuntimeError::new("environment chain is shorter than expected"))?;
        }

        let index = slot.index as usize;
        if let Some(code) = &frame.code {
            if code.recursive_index() == Some(index) {
                return Ok(Value::Closure(frame.clone()));
            }
        }

        frame
            .slots
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("frame slot {} out of range", index)))
    }

    /// Reads the cell stored at `slot`.
    pub fn lookup_cell(env: &Env, slot: Slot) -> ScmResult<Rc<Cell>> {
        match Self::lookup(env, slot)? {
            Value::Cell(cell) => Ok(cell),
            other => Err(RuntimeError::new(format!(
                "expected a cell in frame slot, found {}",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::number::Number;

    #[test]
    fn lookup_follows_parents() {
        let outer = Frame::new(vec![Value::fixnum(1), Value::fixnum(2)], Frame::root());
        let inner = Frame::new(vec![Value::fixnum(3)], outer);

        let v = Frame::lookup(&inner, Slot { depth: 1, index: 1 }).unwrap();
        assert!(matches!(v, Value::Number(n) if n == Number::Fixnum(2)));
        let v = Frame::lookup(&inner, Slot { depth: 0, index: 0 }).unwrap();
        assert!(matches!(v, Value::Number(n) if n == Number::Fixnum(3)));
        assert!(Frame::lookup(&inner, Slot { depth: 5, index: 0 }).is_err());
        assert!(Frame::lookup(&inner, Slot { depth: 0, index: 4 }).is_err());
    }

    #[test]
    fn cells_are_shared() {
        let cell = Cell::new(Value::fixnum(1));
        let a = Frame::new(vec![Value::Cell(cell.clone())], Frame::root());
        let b = Frame::new(vec![Value::Cell(cell)], Frame::root());

        Frame::lookup_cell(&a, Slot { depth: 0, index: 0 })
            .unwrap()
            .set(Value::fixnum(42));
        let seen = Frame::lookup_cell(&b, Slot { depth: 0, index: 0 }).unwrap().get();
        assert!(matches!(seen, Value::Number(n) if n == Number::Fixnum(42)));
    }
}
