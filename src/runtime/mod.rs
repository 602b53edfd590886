//! The runtime: values, environments, continuations, primitives and the
//! evaluator, plus the [`Runtime`] that ties them to a module loader.

use std::{cell::RefCell, path::Path, rc::Rc};

use serde_json::Value as Json;

use crate::{
    compiler::tree_il::Module,
    load::{
        expand::{Expander, RacketExpander},
        Loader,
    },
};

pub mod cont;
pub mod environment;
pub mod error;
pub mod fun;
pub mod module;
pub mod number;
pub mod print;
pub mod subr_arith;
pub mod subr_core;
pub mod symbol;
pub mod value;
pub mod vm;

use self::{
    environment::Frame,
    error::{Error, LoadError, ScmResult},
    module::ModuleTable,
    value::Value,
    vm::Interpreter,
};

/// A module table shared by a loader and an interpreter.
pub struct Runtime {
    loader: Loader,
    interpreter: Interpreter,
}

impl Runtime {
    pub fn new(expander: Box<dyn Expander>) -> Self {
        let modules = Rc::new(RefCell::new(ModuleTable::new()));
        Self {
            loader: Loader::new(modules.clone(), expander),
            interpreter: Interpreter::new(modules),
        }
    }

    /// A runtime expanding sources with Racket, configured from the
    /// environment.
    pub fn with_racket() -> Self {
        Self::new(Box::new(RacketExpander::from_env()))
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    pub fn load_file(&self, path: &Path) -> Result<Rc<Module>, LoadError> {
        self.loader.load_file(path)
    }

    pub fn load_json(&self, json: &Json, file: &str) -> Result<Rc<Module>, LoadError> {
        self.loader.load_json(json, file)
    }

    /// Instantiates `module` and returns the value of its last body form.
    pub fn run(&mut self, module: &Rc<Module>) -> ScmResult<Value> {
        self.interpreter.instantiate(module)
    }

    /// Loads and evaluates one expression at the toplevel.
    pub fn eval_json(&mut self, json: &Json) -> Result<Value, Error> {
        let ast = self.loader.load_expression(json)?;
        Ok(self.interpreter.eval(&ast, Frame::root())?)
    }
}
