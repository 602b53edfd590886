//! Modules: canonical paths, the module table and module instances.
//!
//! The module table records the load state of every file module. Entries only
//! ever move forward, from absent to in progress, then to resolved or failed.
//! An in-progress entry is what stops a module that (transitively) requires
//! itself from being expanded again. A failed entry keeps the rendering of the
//! error that stopped the load.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt::{self, Display},
    rc::Rc,
};

use crate::compiler::tree_il::{Module, VarSet};

use super::{error::LoadError, symbol::Symbol, value::Value};

/// Reserved prefix of modules implemented by the runtime itself.
pub const BUILTIN_PREFIX: &str = "#%";

pub fn is_builtin(file: &str) -> bool {
    file.starts_with(BUILTIN_PREFIX)
}

/// A file module, or a submodule nested inside one.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ModulePath {
    pub file: String,
    pub submodules: Vec<String>,
}

impl ModulePath {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            submodules: vec![],
        }
    }

    pub fn submodule(&self, name: &str) -> Self {
        let mut path = self.clone();
        path.submodules.push(name.to_owned());
        path
    }

    /// Resolves `segments` relative to this module. `"."` stays in the current
    /// module and `".."` moves to the enclosing one.
    pub fn relative(&self, segments: &[String]) -> Option<Self> {
        let mut submodules = self.submodules.clone();
        for segment in segments {
            match segment.as_str() {
                "." => (),
                ".." => {
                    submodules.pop()?;
                }
                name => submodules.push(name.to_owned()),
            }
        }
        Some(Self {
            file: self.file.clone(),
            submodules,
        })
    }

    pub fn is_builtin(&self) -> bool {
        is_builtin(&self.file)
    }
}

impl Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.submodules.is_empty() {
            return write!(f, "{:?}", self.file);
        }
        write!(f, "(submod {:?}", self.file)?;
        for name in &self.submodules {
            write!(f, " {}", name)?;
        }
        write!(f, ")")
    }
}

#[derive(Clone)]
pub enum ModuleEntry {
    InProgress,
    Resolved(Rc<Module>),
    Failed(String),
}

/// What a require of a file found in the table.
pub enum Lookup {
    /// A builtin module; nothing to load.
    Builtin,
    Absent,
    InProgress,
    Resolved(Rc<Module>),
    /// Loading stopped with the given error.
    Failed(String),
}

#[derive(Default)]
pub struct ModuleTable {
    table: HashMap<String, ModuleEntry>,
    current: Vec<String>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, file: &str) -> Lookup {
        if is_builtin(file) {
            return Lookup::Builtin;
        }
        match self.table.get(file) {
            None => Lookup::Absent,
            Some(ModuleEntry::InProgress) => Lookup::InProgress,
            Some(ModuleEntry::Resolved(module)) => Lookup::Resolved(module.clone()),
            Some(ModuleEntry::Failed(error)) => Lookup::Failed(error.clone()),
        }
    }

    pub fn has_module(&self, file: &str) -> bool {
        is_builtin(file) || self.table.contains_key(file)
    }

    /// Resolves a module path, submodules included. `None` when the file is
    /// builtin, unknown or still loading.
    pub fn resolve(&self, path: &ModulePath) -> Option<Rc<Module>> {
        match self.table.get(&path.file)? {
            ModuleEntry::InProgress | ModuleEntry::Failed(_) => None,
            ModuleEntry::Resolved(module) => module.resolve_submodule_path(&path.submodules),
        }
    }

    /// Marks `file` as being loaded.
    pub fn enter_module(&mut self, file: &str) {
        log::debug!(target: "modules", "enter {}", file);
        self.table
            .entry(file.to_owned())
            .or_insert(ModuleEntry::InProgress);
        self.current.push(file.to_owned());
    }

    /// Records the loaded module for `file`.
    pub fn exit_module(&mut self, file: &str, module: Rc<Module>) {
        log::debug!(target: "modules", "exit {}", file);
        if self.current.last().map(String::as_str) == Some(file) {
            self.current.pop();
        }
        let entry = self
            .table
            .entry(file.to_owned())
            .or_insert(ModuleEntry::InProgress);
        if let ModuleEntry::InProgress = entry {
            *entry = ModuleEntry::Resolved(module);
        }
    }

    /// Records that loading `file` stopped with `error`.
    pub fn fail_module(&mut self, file: &str, error: &LoadError) {
        log::debug!(target: "modules", "failed {}: {}", file, error);
        if self.current.last().map(String::as_str) == Some(file) {
            self.current.pop();
        }
        let entry = self
            .table
            .entry(file.to_owned())
            .or_insert(ModuleEntry::InProgress);
        if let ModuleEntry::InProgress = entry {
            *entry = ModuleEntry::Failed(error.to_string());
        }
    }

    /// File currently being loaded.
    pub fn current_mod(&self) -> Option<&str> {
        self.current.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Run time state of an instantiated module.
pub struct ModuleInstance {
    pub path: ModulePath,
    defs: RefCell<HashMap<Symbol, Value>>,
    /// Definitions that may change after they are made. Readers never cache
    /// their values.
    assigned: RefCell<HashSet<Symbol>>,
}

impl ModuleInstance {
    pub fn new(path: ModulePath, assigned: &VarSet) -> Rc<Self> {
        Rc::new(Self {
            path,
            defs: RefCell::new(HashMap::new()),
            assigned: RefCell::new(assigned.iter().cloned().collect()),
        })
    }

    pub fn lookup(&self, name: &Symbol) -> Option<Value> {
        self.defs.borrow().get(name).cloned()
    }

    pub fn define(&self, name: Symbol, value: Value) {
        self.defs.borrow_mut().insert(name, value);
    }

    pub fn is_assigned(&self, name: &Symbol) -> bool {
        self.assigned.borrow().contains(name)
    }

    /// Assigns an existing definition. Returns `false` if `name` is not
    /// defined.
    pub fn set(&self, name: &Symbol, value: Value) -> bool {
        match self.defs.borrow_mut().get_mut(name) {
            Some(slot) => {
                *slot = value;
                self.assigned.borrow_mut().insert(name.clone());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::runtime::error::StructuralError;

    #[test]
    fn relative_paths_are_normalized() {
        let path = ModulePath::new("/a/main.rkt").submodule("test");
        let up = path.relative(&["..".to_owned()]).unwrap();
        assert_eq!(up, ModulePath::new("/a/main.rkt"));
        let sibling = path
            .relative(&["..".to_owned(), ".".to_owned(), "main".to_owned()])
            .unwrap();
        assert_eq!(sibling, ModulePath::new("/a/main.rkt").submodule("main"));
        assert!(ModulePath::new("/a/main.rkt")
            .relative(&["..".to_owned()])
            .is_none());
        assert_eq!(sibling.to_string(), "(submod \"/a/main.rkt\" main)");
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut table = ModuleTable::new();
        assert!(matches!(table.lookup("#%kernel"), Lookup::Builtin));
        assert!(matches!(table.lookup("/x.rkt"), Lookup::Absent));

        table.enter_module("/x.rkt");
        assert!(matches!(table.lookup("/x.rkt"), Lookup::InProgress));
        assert_eq!(table.current_mod(), Some("/x.rkt"));

        let module = Rc::new(Module::new(
            "x".to_owned(),
            ModulePath::new("/x.rkt"),
            vec![],
            IndexMap::new(),
            None,
        ));
        table.exit_module("/x.rkt", module.clone());
        assert!(matches!(table.lookup("/x.rkt"), Lookup::Resolved(m) if Rc::ptr_eq(&m, &module)));
        assert_eq!(table.current_mod(), None);

        // entering again never regresses a resolved entry
        table.enter_module("/x.rkt");
        assert!(matches!(table.lookup("/x.rkt"), Lookup::Resolved(_)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn failed_loads_leave_the_loading_stack() {
        let mut table = ModuleTable::new();
        table.enter_module("/main.rkt");
        table.enter_module("/missing.rkt");
        let error = LoadError::from(StructuralError::without_fragment("no body"));
        table.fail_module("/missing.rkt", &error);
        assert_eq!(table.current_mod(), Some("/main.rkt"));
        table.fail_module("/main.rkt", &error);
        assert_eq!(table.current_mod(), None);

        assert!(matches!(table.lookup("/missing.rkt"), Lookup::Failed(e) if e.contains("no body")));
        assert!(table.resolve(&ModulePath::new("/main.rkt")).is_none());
        // a failed entry stays failed
        table.enter_module("/main.rkt");
        assert!(matches!(table.lookup("/main.rkt"), Lookup::Failed(_)));
    }

    #[test]
    fn instances_hold_definitions() {
        let y = Symbol::intern("y");
        let assigned: VarSet = [y.clone()].into_iter().collect();
        let instance = ModuleInstance::new(ModulePath::new("m"), &assigned);
        let x = Symbol::intern("x");
        assert!(!instance.set(&x, Value::Null));
        instance.define(x.clone(), Value::fixnum(1));
        assert!(!instance.is_assigned(&x));
        assert!(instance.is_assigned(&y));
        assert!(instance.set(&x, Value::fixnum(2)));
        assert!(instance.is_assigned(&x));
        assert!(matches!(instance.lookup(&x), Some(Value::Number(_))));
    }
}
