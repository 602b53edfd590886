//! Free and mutated variable analysis.
//!
//! Both sets are computed bottom-up: the union of the children's sets minus the
//! symbols a binding form introduces. Results are memoized on the node until
//! [`Node::clear_caches`] is called.
//!
//! Both sets hold lexical variables only. Assignments to module variables are
//! collected separately by [`Node::assigned_module_vars`], keyed by their
//! source module, so no lexical binder can hide them.

use std::rc::Rc;

use crate::runtime::symbol::Symbol;

use super::tree_il::{Node, NodeKind, SetTarget, SourceModule, VarSet};

impl Node {
    pub fn free_vars(&self) -> Rc<VarSet> {
        if let Some(vars) = self.free_vars.borrow().as_ref() {
            return vars.clone();
        }
        let vars = Rc::new(self.compute_free_vars());
        *self.free_vars.borrow_mut() = Some(vars.clone());
        vars
    }

    pub fn mutated_vars(&self) -> Rc<VarSet> {
        if let Some(vars) = self.mutated_vars.borrow().as_ref() {
            return vars.clone();
        }
        let vars = Rc::new(self.compute_mutated_vars());
        *self.mutated_vars.borrow_mut() = Some(vars.clone());
        vars
    }

    /// Module variables assigned by a `set!` in this tree, outside of nested
    /// modules.
    pub fn assigned_module_vars(&self) -> Vec<(SourceModule, Symbol)> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = vec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                NodeKind::Module(_) => continue,
                NodeKind::SetBang(set) => {
                    if let SetTarget::Module(var) = &set.target {
                        out.push((var.srcmod.clone(), var.srcsym.clone()));
                    }
                }
                _ => (),
            }
            stack.extend(node.direct_children().into_iter().map(|c| &**c));
        }
        out
    }

    fn compute_free_vars(&self) -> VarSet {
        let mut out = VarSet::new();
        match &self.kind {
            NodeKind::Quote(_)
            | NodeKind::ModuleVar(_)
            | NodeKind::ToplevelVar(_)
            | NodeKind::Require(_)
            | NodeKind::Module(_) => (),
            NodeKind::LexicalVar(var) | NodeKind::CellRef(var) => {
                out.insert(var.sym.clone());
            }
            NodeKind::SetBang(set) => {
                if let SetTarget::Lexical(var) | SetTarget::Cell(var) = &set.target {
                    out.insert(var.sym.clone());
                }
                out.extend(set.rhs.free_vars().iter().cloned());
            }
            NodeKind::CaseLambda(lambda) => {
                for arm in &lambda.arms {
                    let body = arm.body.free_vars();
                    out.extend(
                        body.iter()
                            .filter(|v| !arm.params().any(|p| p == *v))
                            .cloned(),
                    );
                }
                if let Some(sym) = &lambda.recursive_sym {
                    out.shift_remove(sym);
                }
            }
            NodeKind::Let(l) => {
                for rhs in &l.rhss {
                    out.extend(rhs.free_vars().iter().cloned());
                }
                let body = l.body.free_vars();
                out.extend(
                    body.iter()
                        .filter(|v| !l.binders().any(|b| b == *v))
                        .cloned(),
                );
            }
            NodeKind::Letrec(l) => {
                for child in l.rhss.iter().chain(std::iter::once(&l.body)) {
                    out.extend(
                        child
                            .free_vars()
                            .iter()
                            .filter(|v| !l.binders().any(|b| b == *v))
                            .cloned(),
                    );
                }
            }
            NodeKind::DefineValues(def) => {
                out.extend(
                    def.rhs
                        .free_vars()
                        .iter()
                        .filter(|v| !def.names.contains(*v))
                        .cloned(),
                );
            }
            _ => {
                for child in self.direct_children() {
                    out.extend(child.free_vars().iter().cloned());
                }
            }
        }
        out
    }

    fn compute_mutated_vars(&self) -> VarSet {
        let mut out = VarSet::new();
        match &self.kind {
            NodeKind::Quote(_)
            | NodeKind::LexicalVar(_)
            | NodeKind::CellRef(_)
            | NodeKind::ModuleVar(_)
            | NodeKind::ToplevelVar(_)
            | NodeKind::Require(_)
            | NodeKind::Module(_) => (),
            NodeKind::SetBang(set) => {
                if let SetTarget::Lexical(var) | SetTarget::Cell(var) = &set.target {
                    out.insert(var.sym.clone());
                }
                out.extend(set.rhs.mutated_vars().iter().cloned());
            }
            NodeKind::CaseLambda(lambda) => {
                for arm in &lambda.arms {
                    out.extend(
                        arm.body
                            .mutated_vars()
                            .iter()
                            .filter(|v| !arm.params().any(|p| p == *v))
                            .cloned(),
                    );
                }
            }
            NodeKind::Let(l) => {
                for rhs in &l.rhss {
                    out.extend(rhs.mutated_vars().iter().cloned());
                }
                out.extend(
                    l.body
                        .mutated_vars()
                        .iter()
                        .filter(|v| !l.binders().any(|b| b == *v))
                        .cloned(),
                );
            }
            NodeKind::Letrec(l) => {
                for child in l.rhss.iter().chain(std::iter::once(&l.body)) {
                    out.extend(
                        child
                            .mutated_vars()
                            .iter()
                            .filter(|v| !l.binders().any(|b| b == *v))
                            .cloned(),
                    );
                }
            }
            _ => {
                for child in self.direct_children() {
                    out.extend(child.mutated_vars().iter().cloned());
                }
            }
        }
        out
    }
}
