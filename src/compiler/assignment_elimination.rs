//! Assignment conversion.
//!
//! Rewrites a raw tree into the form the evaluator runs:
//!
//! - every lexical reference is resolved to a frame slot,
//! - variables that are the target of some `set!` live in a heap cell, read
//!   through `CellRef` and written through `SetTarget::Cell`,
//! - every lambda records which slots of the defining environment it captures,
//! - a module records which of its definitions it ever assigns.
//!
//! After conversion frames are never written, so two closures that share a
//! mutable variable share its cell.

use std::rc::Rc;

use crate::runtime::error::StructuralError;

use super::{
    env::EnvironmentShape,
    fix_letrec::{convert_let, convert_letrec},
    tree_il::*,
};

type Shape<'a> = Option<&'a Rc<EnvironmentShape>>;

impl Node {
    /// Converts this tree. `vars` is the set of variables assigned somewhere in
    /// scope and `shape` the layout of the frames the result is evaluated in.
    pub fn assign_convert(self: &Rc<Self>, vars: &VarSet, shape: Shape) -> Result<Ast, StructuralError> {
        match &self.kind {
            NodeKind::Quote(_)
            | NodeKind::ToplevelVar(_)
            | NodeKind::Require(_)
            | NodeKind::BeginForSyntax(_) => Ok(self.clone()),
            NodeKind::LexicalVar(var) | NodeKind::CellRef(var) => {
                let binding = resolve(shape, var)?;
                let var = LexicalVar {
                    sym: var.sym.clone(),
                    slot: Some(binding.slot),
                };
                Ok(Node::new(if binding.boxed {
                    NodeKind::CellRef(var)
                } else {
                    NodeKind::LexicalVar(var)
                }))
            }
            NodeKind::ModuleVar(var) => Ok(make_module_var(var.uncached())),
            NodeKind::SetBang(set) => {
                let rhs = set.rhs.assign_convert(vars, shape)?;
                let target = match &set.target {
                    SetTarget::Lexical(var) | SetTarget::Cell(var) => {
                        let binding = resolve(shape, var)?;
                        if !binding.boxed {
                            return Err(StructuralError::without_fragment(format!(
                                "assignment to unboxed variable {}",
                                var.sym
                            )));
                        }
                        SetTarget::Cell(LexicalVar {
                            sym: var.sym.clone(),
                            slot: Some(binding.slot),
                        })
                    }
                    SetTarget::Module(var) => SetTarget::Module(var.uncached()),
                    SetTarget::Toplevel(sym) => SetTarget::Toplevel(sym.clone()),
                };
                Ok(make_set_bang(target, rhs))
            }
            NodeKind::CaseLambda(lambda) => convert_lambda(self, lambda, vars, shape),
            NodeKind::App(app) => {
                let rator = app.rator.assign_convert(vars, shape)?;
                let rands = convert_all(&app.rands, vars, shape)?;
                Ok(make_app(rator, rands))
            }
            NodeKind::If(i) => Ok(make_if(
                i.test.assign_convert(vars, shape)?,
                i.then.assign_convert(vars, shape)?,
                i.els.assign_convert(vars, shape)?,
            )),
            NodeKind::Begin(forms) => Ok(Node::new(NodeKind::Begin(convert_all(forms, vars, shape)?))),
            NodeKind::Begin0(first, rest) => Ok(Node::new(NodeKind::Begin0(
                first.assign_convert(vars, shape)?,
                convert_all(rest, vars, shape)?,
            ))),
            NodeKind::Let(l) => convert_let(l, vars, shape),
            NodeKind::Letrec(l) => convert_letrec(l, vars, shape),
            NodeKind::DefineValues(def) => Ok(make_define_values(
                def.names.clone(),
                def.rhs.assign_convert(vars, shape)?,
                def.display_names.clone(),
                def.module.clone(),
            )),
            NodeKind::Module(module) => Ok(Node::new(NodeKind::Module(module.assign_convert()?))),
            NodeKind::VariableReference(r) => {
                let var = match &r.var {
                    Some(var) => Some(var.assign_convert(vars, shape)?),
                    None => None,
                };
                Ok(make_variable_reference(var, r.module.clone()))
            }
            NodeKind::WithContinuationMark(w) => Ok(make_wcm(
                w.key.assign_convert(vars, shape)?,
                w.value.assign_convert(vars, shape)?,
                w.body.assign_convert(vars, shape)?,
            )),
        }
    }
}

impl Module {
    /// Converts every body form of this module and its submodules, then
    /// records the lambdas each form contains and the definitions the module
    /// assigns.
    pub fn assign_convert(&self) -> Result<Rc<Module>, StructuralError> {
        let mut mutated = VarSet::new();
        let mut assigned = VarSet::new();
        let this = SourceModule::Path(self.path.clone());
        for form in self.body.iter().chain(self.lang.iter()) {
            mutated.extend(form.mutated_vars().iter().cloned());
            assigned.extend(
                form.assigned_module_vars()
                    .into_iter()
                    .filter(|(srcmod, _)| *srcmod == this)
                    .map(|(_, sym)| sym),
            );
        }

        let body = convert_all(&self.body, &mutated, None)?;
        let lang = match &self.lang {
            Some(lang) => Some(lang.assign_convert(&mutated, None)?),
            None => None,
        };

        let mut lambdas = Vec::new();
        for form in lang.iter().chain(body.iter()) {
            form.set_surrounding_lambda(None);
            form.collect_lambdas(&mut lambdas);
        }
        log::debug!(
            target: "compiler",
            "converted module {}: {} forms, {} lambdas, {} assigned definitions",
            self.path,
            body.len(),
            lambdas.len(),
            assigned.len()
        );

        let mut module = Module::new(
            self.name.clone(),
            self.path.clone(),
            body,
            self.config.clone(),
            lang,
        );
        module.lambdas = lambdas;
        module.assigned = assigned;
        Ok(Rc::new(module))
    }
}

pub(crate) fn convert_all(forms: &[Ast], vars: &VarSet, shape: Shape) -> Result<Vec<Ast>, StructuralError> {
    forms
        .iter()
        .map(|form| form.assign_convert(vars, shape))
        .collect()
}

fn resolve(shape: Shape, var: &LexicalVar) -> Result<super::env::Binding, StructuralError> {
    EnvironmentShape::resolve(shape, &var.sym).ok_or_else(|| {
        StructuralError::without_fragment(format!("unbound lexical variable {}", var.sym))
    })
}

/// Lays out the closure frame: the free variables in first-reference order,
/// then the closure itself when a recursive lambda refers to its own name.
fn convert_lambda(
    node: &Ast,
    lambda: &CaseLambda,
    vars: &VarSet,
    shape: Shape,
) -> Result<Ast, StructuralError> {
    let free = node.free_vars();
    let mut captures = Vec::with_capacity(free.len() + 1);
    let mut closure_vars = Vec::with_capacity(free.len() + 1);
    let mut closure_boxed = Vec::with_capacity(free.len() + 1);
    for sym in free.iter() {
        let binding = EnvironmentShape::resolve(shape, sym).ok_or_else(|| {
            StructuralError::without_fragment(format!("unbound lexical variable {}", sym))
        })?;
        captures.push(Capture::Slot(binding.slot));
        closure_vars.push(sym.clone());
        closure_boxed.push(binding.boxed);
    }

    if let Some(sym) = &lambda.recursive_sym {
        let self_referenced = lambda
            .arms
            .iter()
            .any(|arm| !arm.params().any(|p| p == sym) && arm.body.free_vars().contains(sym));
        if self_referenced {
            captures.push(Capture::Itself);
            closure_vars.push(sym.clone());
            closure_boxed.push(false);
        }
    }

    let closure_shape = EnvironmentShape::new(closure_vars, closure_boxed, None);
    let mut arms = Vec::with_capacity(lambda.arms.len());
    for arm in &lambda.arms {
        let muts = arm.body.mutated_vars();
        let params: Vec<_> = arm.params().cloned().collect();
        let boxed: Vec<bool> = params.iter().map(|p| muts.contains(p)).collect();

        let mut arm_vars: VarSet = vars.iter().filter(|v| !params.contains(v)).cloned().collect();
        arm_vars.extend(params.iter().filter(|p| muts.contains(*p)).cloned());

        let arm_shape = EnvironmentShape::new(params, boxed.clone(), Some(closure_shape.clone()));
        arms.push(Lambda {
            formals: arm.formals.clone(),
            rest: arm.rest.clone(),
            body: arm.body.assign_convert(&arm_vars, Some(&arm_shape))?,
            boxed,
        });
    }

    Ok(Node::new(NodeKind::CaseLambda(CaseLambda::new(
        arms,
        lambda.recursive_sym.clone(),
        lambda.srcloc.clone(),
        captures,
    ))))
}
