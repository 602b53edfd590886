//! Compile time environment shapes.
//!
//! A shape is the layout of one runtime frame: the ordered variables it binds
//! and whether each slot holds a cell. Shapes are chained the same way frames
//! are, so a variable resolves to a `(depth, index)` pair.

use std::rc::Rc;

use crate::runtime::symbol::Symbol;

/// Position of a variable in the runtime frame chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Number of parent links to follow.
    pub depth: u32,
    pub index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub slot: Slot,
    pub boxed: bool,
}

pub struct EnvironmentShape {
    vars: Vec<Symbol>,
    boxed: Vec<bool>,
    prev: Option<Rc<EnvironmentShape>>,
}

impl EnvironmentShape {
    pub fn new(
        vars: Vec<Symbol>,
        boxed: Vec<bool>,
        prev: Option<Rc<EnvironmentShape>>,
    ) -> Rc<Self> {
        debug_assert_eq!(vars.len(), boxed.len());
        Rc::new(Self { vars, boxed, prev })
    }

    pub fn vars(&self) -> &[Symbol] {
        &self.vars
    }

    pub fn is_boxed(&self, index: usize) -> bool {
        self.boxed.get(index).copied().unwrap_or(false)
    }

    /// Finds the innermost binding of `sym`.
    pub fn resolve(shape: Option<&Rc<EnvironmentShape>>, sym: &Symbol) -> Option<Binding> {
        let mut depth = 0;
        let mut current = shape;
        while let Some(shape) = current {
            // later binders shadow earlier ones within a frame
            if let Some(index) = shape.vars.iter().rposition(|v| v == sym) {
                return Some(Binding {
                    slot: Slot {
                        depth,
                        index: index as u32,
                    },
                    boxed: shape.boxed[index],
                });
            }
            depth += 1;
            current = shape.prev.as_ref();
        }
        None
    }
}
