//! Module loading.
//!
//! A module is loaded at most once per module table. Loading marks the file
//! in progress, expands it, reads the expanded tree (requiring further files
//! along the way), converts the result and finally records it as resolved. A
//! load that fails is recorded as failed, and loading the file again reports
//! that failure.

use std::{
    cell::RefCell,
    path::Path,
    rc::Rc,
};

use serde_json::Value as Json;

use crate::{
    compiler::tree_il::{Ast, Module},
    runtime::{
        error::{ExpansionError, LoadError, StructuralError},
        module::{Lookup, ModulePath, ModuleTable},
    },
};

pub mod expand;
pub mod reader;

use expand::Expander;
use reader::JsonReader;

pub struct Loader {
    modules: Rc<RefCell<ModuleTable>>,
    expander: Box<dyn Expander>,
}

impl Loader {
    pub fn new(modules: Rc<RefCell<ModuleTable>>, expander: Box<dyn Expander>) -> Self {
        Self { modules, expander }
    }

    pub fn modules(&self) -> &Rc<RefCell<ModuleTable>> {
        &self.modules
    }

    /// Loads the module implemented by the source file at `path`.
    pub fn load_file(&self, path: &Path) -> Result<Rc<Module>, LoadError> {
        let file = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let file = file.to_string_lossy().into_owned();
        self.require_file(&file)?;
        self.resolved(&file)
    }

    /// Loads an already expanded module tree, registering it under `file`.
    pub fn load_json(&self, json: &Json, file: &str) -> Result<Rc<Module>, LoadError> {
        let lookup = self.modules.borrow().lookup(file);
        match lookup {
            Lookup::Absent => {
                self.modules.borrow_mut().enter_module(file);
                let result = self.read_module(json, file);
                self.finish(file, result)?;
            }
            Lookup::Failed(error) => return Err(failed(file, error)),
            Lookup::Builtin | Lookup::InProgress | Lookup::Resolved(_) => (),
        }
        self.resolved(file)
    }

    /// Reads and converts a single expression outside of any module.
    pub fn load_expression(&self, json: &Json) -> Result<Ast, LoadError> {
        let ast = JsonReader::new(self).to_ast(json)?;
        let converted = ast.assign_convert(&ast.mutated_vars(), None)?;
        converted.set_surrounding_lambda(None);
        Ok(converted)
    }

    /// Makes sure `file` is in the module table, loading it if it is absent.
    /// Returns `true` for builtin modules, which have nothing to load.
    pub(crate) fn require_file(&self, file: &str) -> Result<bool, LoadError> {
        let lookup = self.modules.borrow().lookup(file);
        match lookup {
            Lookup::Builtin => return Ok(true),
            Lookup::InProgress | Lookup::Resolved(_) => return Ok(false),
            Lookup::Failed(error) => return Err(failed(file, error)),
            Lookup::Absent => (),
        }

        self.modules.borrow_mut().enter_module(file);
        let result = self
            .expand(Path::new(file))
            .map_err(LoadError::from)
            .and_then(|json| self.read_module(&json, file));
        self.finish(file, result)?;
        Ok(false)
    }

    /// Leaves the in-progress state of `file`, recording the outcome.
    fn finish(&self, file: &str, result: Result<Rc<Module>, LoadError>) -> Result<(), LoadError> {
        match result {
            Ok(module) => {
                self.modules.borrow_mut().exit_module(file, module);
                Ok(())
            }
            Err(err) => {
                self.modules.borrow_mut().fail_module(file, &err);
                Err(err)
            }
        }
    }

    fn expand(&self, source: &Path) -> Result<Json, ExpansionError> {
        match self.expander.expand(source) {
            Err(err) if err.is_permission_denied() => {
                log::warn!(
                    target: "modules",
                    "{}; expanding {} without a cache",
                    err,
                    source.display()
                );
                self.expander.expand_uncached(source)
            }
            result => result,
        }
    }

    fn read_module(&self, json: &Json, file: &str) -> Result<Rc<Module>, LoadError> {
        let module = JsonReader::new(self).to_module(json, ModulePath::new(file))?;
        Ok(module.assign_convert()?)
    }

    fn resolved(&self, file: &str) -> Result<Rc<Module>, LoadError> {
        self.modules
            .borrow()
            .resolve(&ModulePath::new(file))
            .ok_or_else(|| {
                StructuralError::without_fragment(format!("module {} did not finish loading", file))
                    .into()
            })
    }
}

fn failed(file: &str, error: String) -> LoadError {
    LoadError::Failed {
        file: file.to_owned(),
        error,
    }
}
