//! Interned symbols.
//!
//! Symbols are interned into a per-thread table, two symbols are equal iff they
//! point to the same interned string. Hashing uses the string address as well,
//! so symbol sets and maps never compare string contents.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    hash::{Hash, Hasher},
    rc::Rc,
};

thread_local! {
    static SYMTAB: RefCell<HashSet<Rc<str>>> = RefCell::new(HashSet::new());
    static GENSYM_COUNTER: Cell<u64> = const { Cell::new(0) };
}

#[derive(Clone)]
pub struct Symbol(Rc<str>);

impl Symbol {
    /// Interns `name`, returning the unique symbol with that spelling.
    pub fn intern(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        SYMTAB.with(|symtab| {
            if let Some(sym) = symtab.borrow().get(name) {
                return Symbol(sym.clone());
            }

            let sym: Rc<str> = Rc::from(name);
            symtab.borrow_mut().insert(sym.clone());
            Symbol(sym)
        })
    }

    /// Creates a fresh interned symbol that does not clash with any symbol
    /// seen so far.
    pub fn gensym(prefix: &str) -> Self {
        loop {
            let id = GENSYM_COUNTER.with(|counter| {
                let id = counter.get();
                counter.set(id + 1);
                id
            });
            let name = format!("{}_{}", prefix, id);
            let exists = SYMTAB.with(|symtab| symtab.borrow().contains(name.as_str()));
            if !exists {
                return Self::intern(name);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.as_ptr() as usize).hash(state)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}", &*self.0)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_symbols_are_identical() {
        let a = Symbol::intern("lambda");
        let b = Symbol::intern(String::from("lambda"));
        assert_eq!(a, b);
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_ne!(a, Symbol::intern("lambda2"));
    }

    #[test]
    fn gensym_is_fresh() {
        let taken = Symbol::intern("tmp_0");
        let fresh = Symbol::gensym("tmp");
        assert_ne!(taken, fresh);
        assert_ne!(Symbol::gensym("tmp"), fresh);
    }
}
