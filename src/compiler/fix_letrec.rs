//! Conversion of `let-values` and `letrec-values`.
//!
//! A `let` binding is dropped and its right-hand side substituted when doing so
//! cannot change what the program observes: literals and primitives anywhere
//! in the body, and a lambda that is only called or returned right away. A
//! binder named by a `#%variable-reference` is always kept. A `letrec` that binds a single lambda becomes a `let`
//! of a recursive lambda, which needs no cell. Every other `letrec` binder is
//! boxed, so its right-hand sides see the cells before they are filled.

use std::rc::Rc;

use crate::runtime::{error::StructuralError, symbol::Symbol};

use super::{
    assignment_elimination::convert_all,
    env::EnvironmentShape,
    tree_il::*,
};

type Shape<'a> = Option<&'a Rc<EnvironmentShape>>;

pub(crate) fn convert_let(l: &Let, vars: &VarSet, shape: Shape) -> Result<Ast, StructuralError> {
    let all_binders: Vec<Symbol> = l.binders().cloned().collect();
    let body_muts = l.body.mutated_vars();

    let mut body = l.body.clone();
    let mut kept_vars = Vec::with_capacity(l.vars.len());
    let mut kept_rhss = Vec::with_capacity(l.rhss.len());
    for (names, rhs) in l.vars.iter().zip(l.rhss.iter()) {
        if let [name] = names.as_slice() {
            if !body_muts.contains(name) && !names_variable(&body, name) {
                if let Some(inlined) = try_inline(name, rhs, &body, &all_binders) {
                    log::trace!(target: "compiler", "inlined let binding {}", name);
                    body = inlined;
                    continue;
                }
            }
        }
        kept_vars.push(names.clone());
        kept_rhss.push(rhs.clone());
    }

    if kept_rhss.is_empty() {
        return body.assign_convert(vars, shape);
    }

    let rhss = convert_all(&kept_rhss, vars, shape)?;
    let binders: Vec<Symbol> = kept_vars.iter().flatten().cloned().collect();
    let muts = body.mutated_vars();
    let boxed: Vec<bool> = binders.iter().map(|b| muts.contains(b)).collect();

    let mut body_vars: VarSet = vars.iter().filter(|v| !binders.contains(v)).cloned().collect();
    body_vars.extend(binders.iter().filter(|b| muts.contains(*b)).cloned());

    let body_shape = EnvironmentShape::new(binders, boxed.clone(), shape.cloned());
    let body = body.assign_convert(&body_vars, Some(&body_shape))?;
    Ok(Node::new(NodeKind::Let(Let {
        vars: kept_vars,
        rhss,
        body,
        boxed,
    })))
}

pub(crate) fn convert_letrec(l: &Let, vars: &VarSet, shape: Shape) -> Result<Ast, StructuralError> {
    if l.rhss.is_empty() {
        return l.body.assign_convert(vars, shape);
    }

    if let ([names], [rhs]) = (l.vars.as_slice(), l.rhss.as_slice()) {
        if let ([name], NodeKind::CaseLambda(lambda)) = (names.as_slice(), &rhs.kind) {
            let assigned = rhs.mutated_vars().contains(name) || l.body.mutated_vars().contains(name);
            if !assigned && lambda.recursive_sym.is_none() {
                let recursive = Node::new(NodeKind::CaseLambda(CaseLambda::new(
                    lambda.arms.iter().map(|arm| copy_arm(arm, arm.body.clone())).collect(),
                    Some(name.clone()),
                    lambda.srcloc.clone(),
                    vec![],
                )));
                let l = Let {
                    vars: vec![vec![name.clone()]],
                    rhss: vec![recursive],
                    body: l.body.clone(),
                    boxed: vec![],
                };
                return convert_let(&l, vars, shape);
            }
        }
    }

    let binders: Vec<Symbol> = l.binders().cloned().collect();
    let boxed = vec![true; binders.len()];
    let mut inner_vars = vars.clone();
    inner_vars.extend(binders.iter().cloned());

    let inner_shape = EnvironmentShape::new(binders, boxed.clone(), shape.cloned());
    let rhss = convert_all(&l.rhss, &inner_vars, Some(&inner_shape))?;
    let body = l.body.assign_convert(&inner_vars, Some(&inner_shape))?;
    Ok(Node::new(NodeKind::Letrec(Let {
        vars: l.vars.clone(),
        rhss,
        body,
        boxed,
    })))
}

/// The body with `name` replaced by `rhs`, when the binding can be dropped.
fn try_inline(name: &Symbol, rhs: &Ast, body: &Ast, binders: &[Symbol]) -> Option<Ast> {
    match &rhs.kind {
        NodeKind::Quote(value) => {
            let value = value.clone();
            Some(substitute(body, name, &|| make_quote(value.clone())))
        }
        // other modules may assign their definitions
        NodeKind::ModuleVar(var) if matches!(var.srcmod, SourceModule::Builtin(_)) => {
            Some(substitute(body, name, &|| make_module_var(var.uncached())))
        }
        NodeKind::CaseLambda(_) => {
            // the lambda moves under the other binders of this let
            let frees = rhs.free_vars();
            if binders.iter().any(|b| frees.contains(b)) {
                return None;
            }
            match &body.kind {
                NodeKind::LexicalVar(v) if &v.sym == name => Some(rhs.clone()),
                NodeKind::App(app)
                    if matches!(&app.rator.kind, NodeKind::LexicalVar(v) if &v.sym == name)
                        && app.rands.iter().all(|r| !r.free_vars().contains(name)) =>
                {
                    Some(make_app(rhs.clone(), app.rands.clone()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// True when some `#%variable-reference` in `node` names `name`.
fn names_variable(node: &Ast, name: &Symbol) -> bool {
    let mut stack: Vec<&Ast> = vec![node];
    while let Some(node) = stack.pop() {
        if let NodeKind::VariableReference(r) = &node.kind {
            if matches!(&r.var, Some(var) if matches!(&var.kind, NodeKind::LexicalVar(v) if &v.sym == name)) {
                return true;
            }
        }
        if node.free_vars().contains(name) {
            stack.extend(node.direct_children());
        }
    }
    false
}

fn copy_arm(arm: &Lambda, body: Ast) -> Lambda {
    Lambda {
        formals: arm.formals.clone(),
        rest: arm.rest.clone(),
        body,
        boxed: arm.boxed.clone(),
    }
}

fn copy_target(target: &SetTarget) -> SetTarget {
    match target {
        SetTarget::Lexical(var) => SetTarget::Lexical(var.clone()),
        SetTarget::Cell(var) => SetTarget::Cell(var.clone()),
        SetTarget::Module(var) => SetTarget::Module(var.uncached()),
        SetTarget::Toplevel(sym) => SetTarget::Toplevel(sym.clone()),
    }
}

/// Copy of `node` with free references to `name` replaced by `with()`.
/// Subtrees that do not refer to `name` are shared.
fn substitute(node: &Ast, name: &Symbol, with: &dyn Fn() -> Ast) -> Ast {
    if !node.free_vars().contains(name) {
        return node.clone();
    }
    let sub = |child: &Ast| substitute(child, name, with);
    let sub_all = |children: &[Ast]| children.iter().map(|c| substitute(c, name, with)).collect::<Vec<_>>();

    match &node.kind {
        NodeKind::LexicalVar(var) if &var.sym == name => with(),
        NodeKind::SetBang(set) => make_set_bang(copy_target(&set.target), sub(&set.rhs)),
        NodeKind::CaseLambda(lambda) => {
            let arms = lambda
                .arms
                .iter()
                .map(|arm| {
                    if arm.params().any(|p| p == name) {
                        copy_arm(arm, arm.body.clone())
                    } else {
                        copy_arm(arm, sub(&arm.body))
                    }
                })
                .collect();
            Node::new(NodeKind::CaseLambda(CaseLambda::new(
                arms,
                lambda.recursive_sym.clone(),
                lambda.srcloc.clone(),
                lambda.captures.clone(),
            )))
        }
        NodeKind::App(app) => make_app(sub(&app.rator), sub_all(&app.rands)),
        NodeKind::If(i) => make_if(sub(&i.test), sub(&i.then), sub(&i.els)),
        NodeKind::Begin(forms) => Node::new(NodeKind::Begin(sub_all(forms))),
        NodeKind::Begin0(first, rest) => Node::new(NodeKind::Begin0(sub(first), sub_all(rest))),
        NodeKind::Let(l) => {
            let body = if l.binders().any(|b| b == name) {
                l.body.clone()
            } else {
                sub(&l.body)
            };
            Node::new(NodeKind::Let(Let {
                vars: l.vars.clone(),
                rhss: sub_all(&l.rhss),
                body,
                boxed: l.boxed.clone(),
            }))
        }
        NodeKind::Letrec(l) => Node::new(NodeKind::Letrec(Let {
            vars: l.vars.clone(),
            rhss: sub_all(&l.rhss),
            body: sub(&l.body),
            boxed: l.boxed.clone(),
        })),
        NodeKind::DefineValues(def) => make_define_values(
            def.names.clone(),
            sub(&def.rhs),
            def.display_names.clone(),
            def.module.clone(),
        ),
        NodeKind::WithContinuationMark(w) => make_wcm(sub(&w.key), sub(&w.value), sub(&w.body)),
        _ => node.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    fn var(s: &str) -> Ast {
        make_lexical(sym(s))
    }

    fn convert(ast: &Ast) -> Ast {
        ast.assign_convert(&VarSet::new(), None).unwrap()
    }

    #[test]
    fn literal_bindings_are_substituted() {
        // (let ([a 1]) a)
        let ast = make_let(vec![vec![sym("a")]], vec![make_quote(Value::fixnum(1))], vec![var("a")]);
        let converted = convert(&ast);
        assert!(matches!(&converted.kind, NodeKind::Quote(_)));
    }

    #[test]
    fn substitution_respects_shadowing() {
        // (let ([a 1]) (let ([a (f)]) a)) keeps the inner binding intact
        let inner = make_let(
            vec![vec![sym("a")]],
            vec![make_app(make_toplevel(sym("f")), vec![])],
            vec![var("a")],
        );
        let ast = make_let(vec![vec![sym("a")]], vec![make_quote(Value::fixnum(1))], vec![inner]);
        let converted = convert(&ast);
        let NodeKind::Let(l) = &converted.kind else {
            panic!("expected the inner let, got {}", converted);
        };
        assert!(matches!(&l.body.kind, NodeKind::LexicalVar(_)));
    }

    #[test]
    fn assigned_bindings_stay() {
        // (let ([a 1]) (set! a 2) a)
        let ast = make_let(
            vec![vec![sym("a")]],
            vec![make_quote(Value::fixnum(1))],
            vec![
                make_set_bang(
                    SetTarget::Lexical(LexicalVar { sym: sym("a"), slot: None }),
                    make_quote(Value::fixnum(2)),
                ),
                var("a"),
            ],
        );
        let converted = convert(&ast);
        let NodeKind::Let(l) = &converted.kind else {
            panic!("expected a let, got {}", converted);
        };
        assert_eq!(l.boxed, vec![true]);
    }

    #[test]
    fn single_lambda_letrec_becomes_recursive_lambda() {
        // (letrec ([f (lambda (n) (f n))]) f)
        let lambda = make_lambda(vec![sym("n")], None, vec![make_app(var("f"), vec![var("n")])]);
        let ast = make_letrec(vec![vec![sym("f")]], vec![lambda], vec![var("f")]);
        let converted = convert(&ast);
        let NodeKind::CaseLambda(lambda) = &converted.kind else {
            panic!("expected a lambda, got {}", converted);
        };
        assert_eq!(lambda.recursive_sym, Some(sym("f")));
        assert_eq!(lambda.captures, vec![Capture::Itself]);
    }

    #[test]
    fn mutual_letrec_boxes_every_binder() {
        let even = make_lambda(vec![sym("n")], None, vec![make_app(var("odd"), vec![var("n")])]);
        let odd = make_lambda(vec![sym("n")], None, vec![make_app(var("even"), vec![var("n")])]);
        let ast = make_letrec(
            vec![vec![sym("even")], vec![sym("odd")]],
            vec![even, odd],
            vec![var("even")],
        );
        let converted = convert(&ast);
        let NodeKind::Letrec(l) = &converted.kind else {
            panic!("expected a letrec, got {}", converted);
        };
        assert_eq!(l.boxed, vec![true, true]);
        assert!(matches!(&l.body.kind, NodeKind::CellRef(_)));
    }

    #[test]
    fn lambda_not_inlined_under_capturing_binder() {
        // (let ([y 1] [g (lambda () y)]) (g)) with y bound outside too
        let outer = make_let(
            vec![vec![sym("y")]],
            vec![make_app(make_toplevel(sym("h")), vec![])],
            vec![make_let(
                vec![vec![sym("y")], vec![sym("g")]],
                vec![
                    make_app(make_toplevel(sym("h")), vec![]),
                    make_lambda(vec![], None, vec![var("y")]),
                ],
                vec![make_app(var("g"), vec![])],
            )],
        );
        let converted = convert(&outer);
        let NodeKind::Let(outer) = &converted.kind else {
            panic!("expected a let, got {}", converted);
        };
        let NodeKind::Let(inner) = &outer.body.kind else {
            panic!("expected a let, got {}", outer.body);
        };
        assert_eq!(inner.vars.len(), 2);
    }

    #[test]
    fn variable_reference_keeps_its_binding() {
        // (let ([a 1]) (#%variable-reference a))
        let ast = make_let(
            vec![vec![sym("a")]],
            vec![make_quote(Value::fixnum(1))],
            vec![make_variable_reference(Some(var("a")), None)],
        );
        let converted = convert(&ast);
        let NodeKind::Let(l) = &converted.kind else {
            panic!("expected a let, got {}", converted);
        };
        assert!(matches!(
            &l.body.kind,
            NodeKind::VariableReference(r) if matches!(&r.var, Some(v) if matches!(v.kind, NodeKind::LexicalVar(_)))
        ));
    }
}
