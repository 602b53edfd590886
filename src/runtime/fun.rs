//! Closure construction.
//!
//! A closure is a frame holding the values of the lambda's free variables in
//! the order fixed by assignment conversion. Each lambda keeps a single slot
//! cache: lambdas without free variables reuse one closure while it is alive,
//! others reuse the last closure while they are evaluated against the same
//! environment frame. The cache holds its entries weakly, so a lambda and its
//! closures never keep each other alive.

use std::rc::Rc;

use crate::compiler::tree_il::{CaseLambda, Capture, ClosureCache, Lambda};

use super::{
    environment::{Cell, Env, Frame},
    error::{arity_error, ScmResult},
    value::Value,
};

impl CaseLambda {
    /// Closure of this lambda over `env`, reused from the cache when possible.
    pub fn make_or_retrieve_closure(self: &Rc<Self>, env: &Env) -> ScmResult<Value> {
        match &*self.cache.borrow() {
            ClosureCache::Constant(closure) => {
                if let Some(closure) = closure.upgrade() {
                    return Ok(Value::Closure(closure));
                }
            }
            ClosureCache::Keyed {
                env: cached_env,
                closure,
            } if std::ptr::eq(cached_env.as_ptr(), Rc::as_ptr(env)) => {
                if let Some(closure) = closure.upgrade() {
                    return Ok(Value::Closure(closure));
                }
            }
            _ => (),
        }

        log::trace!(target: "closure", "cache miss for lambda {:?}", self.id);
        let closure = self.make_closure(env)?;
        let entry = if self.captures.iter().all(|c| *c == Capture::Itself) {
            ClosureCache::Constant(Rc::downgrade(&closure))
        } else {
            ClosureCache::Keyed {
                env: Rc::downgrade(env),
                closure: Rc::downgrade(&closure),
            }
        };
        *self.cache.borrow_mut() = entry;
        Ok(Value::Closure(closure))
    }

    /// Builds a fresh closure capturing the free variables from `env`.
    pub fn make_closure(self: &Rc<Self>, env: &Env) -> ScmResult<Env> {
        let mut captured = Vec::with_capacity(self.captures.len());
        for capture in &self.captures {
            captured.push(match capture {
                Capture::Slot(slot) => Frame::lookup(env, *slot)?,
                // read through the frame itself, see `Frame::lookup`
                Capture::Itself => Value::Void,
            });
        }
        Ok(Frame::closure(self.clone(), captured))
    }
}

impl Lambda {
    /// Slots of the frame a call to this arm runs in. Boxed parameters get a
    /// fresh cell.
    pub fn bind_arguments(&self, name: &str, mut args: Vec<Value>) -> ScmResult<Vec<Value>> {
        if !self.accepts(args.len()) {
            let expected = match self.rest {
                Some(_) => format!("at least {}", self.formals.len()),
                None => self.formals.len().to_string(),
            };
            return arity_error(name, &expected, args.len());
        }

        if self.rest.is_some() {
            let rest = Value::list(args.split_off(self.formals.len()));
            args.push(rest);
        }

        for (arg, boxed) in args.iter_mut().zip(self.boxed.iter()) {
            if *boxed {
                let value = std::mem::replace(arg, Value::Void);
                *arg = Value::Cell(Cell::new(value));
            }
        }
        Ok(args)
    }
}
