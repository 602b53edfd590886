//! The evaluator.
//!
//! Evaluation is a loop over [`Step`]s. A step either evaluates a node in an
//! environment with a continuation, or delivers a value to a continuation.
//! Nodes never call back into the loop, so native stack usage does not depend
//! on how deep the program recurses, and a call in tail position passes its
//! continuation on unchanged.

use std::{cell::RefCell, collections::HashMap, io::Write, rc::Rc};

use crate::compiler::tree_il::{
    Ast, Module, ModuleVar, Node, NodeKind, SetTarget, SourceModule,
};

use super::{
    cont::{Cont, ContKind},
    environment::{Cell, Env, Frame},
    error::{arity_error, RuntimeError, ScmResult},
    module::{ModuleInstance, ModulePath, ModuleTable},
    subr_core::lookup_primitive,
    symbol::Symbol,
    value::{Value, VariableReference},
};

pub enum Step {
    Eval(Ast, Env, Rc<Cont>),
    Return(Value, Rc<Cont>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Longest continuation chain seen when evaluating a node.
    pub max_depth: usize,
    pub steps: u64,
}

pub struct Interpreter {
    modules: Rc<RefCell<ModuleTable>>,
    instances: HashMap<ModulePath, Rc<ModuleInstance>>,
    toplevel: HashMap<Symbol, Value>,
    root: Env,
    output: Box<dyn Write>,
    stats: Stats,
}

impl Interpreter {
    pub fn new(modules: Rc<RefCell<ModuleTable>>) -> Self {
        Self {
            modules,
            instances: HashMap::new(),
            toplevel: HashMap::new(),
            root: Frame::root(),
            output: Box::new(std::io::stdout()),
            stats: Stats::default(),
        }
    }

    /// Redirects `display`, `write` and `newline`.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn write_output(&mut self, text: &str) -> ScmResult<()> {
        self.output
            .write_all(text.as_bytes())
            .and_then(|_| self.output.flush())
            .map_err(|err| RuntimeError::new(format!("error writing output: {}", err)))
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    pub fn instance(&self, path: &ModulePath) -> Option<&Rc<ModuleInstance>> {
        self.instances.get(path)
    }

    pub fn define_toplevel(&mut self, name: Symbol, value: Value) {
        self.toplevel.insert(name, value);
    }

    /// Evaluates a converted expression to completion.
    pub fn eval(&mut self, node: &Ast, env: Env) -> ScmResult<Value> {
        self.execute(Step::Eval(node.clone(), env, Cont::done()))
    }

    /// Instantiates `module`, returning the value of its last body form.
    pub fn instantiate(&mut self, module: &Rc<Module>) -> ScmResult<Value> {
        let step = self.start_module(module.clone(), Cont::done())?;
        self.execute(step)
    }

    pub fn execute(&mut self, mut step: Step) -> ScmResult<Value> {
        loop {
            self.stats.steps += 1;
            let (result, k) = match step {
                Step::Eval(node, env, k) => {
                    self.stats.max_depth = self.stats.max_depth.max(k.depth());
                    let current = k.clone();
                    let result = node
                        .interpret(env, k, self)
                        .map_err(|err| err.with_srcloc(node.srcloc()));
                    (result, current)
                }
                Step::Return(value, k) => {
                    if k.is_done() {
                        return Ok(value);
                    }
                    // `k` is consumed by delivery; errors unwind from its parent
                    let current = k.parent().cloned().unwrap_or_else(Cont::done);
                    let node = k.kind.node().cloned();
                    let result = self
                        .deliver(value, k)
                        .map_err(|err| err.with_srcloc(node.and_then(|node| node.srcloc())));
                    (result, current)
                }
            };

            step = match result {
                Ok(next) => next,
                Err(err) => self.unwind(err, k)?,
            };
        }
    }

    /// Passes `err` to the nearest handler in `k`. A handler that fails
    /// itself hands its error to the next handler out.
    fn unwind(&mut self, mut err: RuntimeError, mut k: Rc<Cont>) -> ScmResult<Step> {
        loop {
            let Some((handler, parent)) = Cont::find_handler(&k) else {
                return Err(err);
            };
            log::debug!(target: "vm", "handling error: {}", err);
            match self.apply(handler, vec![err.to_value()], parent.clone()) {
                Ok(step) => return Ok(step),
                Err(next) => {
                    err = next;
                    k = parent;
                }
            }
        }
    }

    pub fn apply(&mut self, f: Value, args: Vec<Value>, k: Rc<Cont>) -> ScmResult<Step> {
        match f {
            Value::Closure(env) => {
                let Some(code) = env.code().cloned() else {
                    return Err(RuntimeError::new("application: closure without code"));
                };
                let Some(arm) = code.select_arm(args.len()) else {
                    let name = Value::Closure(env.clone()).to_string();
                    return arity_error(&name, &code.arity_string(), args.len());
                };
                let slots = arm.bind_arguments("#<procedure>", args)?;
                Ok(Step::Eval(arm.body.clone(), Frame::new(slots, env), k))
            }
            Value::Primitive(prim) => prim.invoke(self, args, k),
            Value::Continuation(target) => Ok(Step::Return(Value::values(args), target)),
            other => Err(RuntimeError::new(format!(
                "application: not a procedure;\n expected a procedure that can be applied to arguments\n  given: {}",
                other
            ))),
        }
    }

    fn deliver(&mut self, value: Value, k: Rc<Cont>) -> ScmResult<Step> {
        let (kind, parent) = Cont::unpack(k);
        match kind {
            ContKind::Done | ContKind::Marks { .. } | ContKind::Handler { .. } => {
                Ok(Step::Return(value, parent))
            }
            ContKind::Void => Ok(Step::Return(Value::Void, parent)),
            ContKind::App {
                node,
                env,
                mut values,
            } => {
                values.push(single(value)?);
                continue_app(self, node, env, values, parent)
            }
            ContKind::If { node, env } => {
                let NodeKind::If(i) = &node.kind else {
                    unreachable!("if continuation without if node")
                };
                let branch = if single(value)?.is_true() {
                    &i.then
                } else {
                    &i.els
                };
                Ok(Step::Eval(branch.clone(), env, parent))
            }
            ContKind::Begin { node, env, index } => {
                let NodeKind::Begin(forms) = &node.kind else {
                    unreachable!("begin continuation without begin node")
                };
                let form = forms[index].clone();
                if index + 1 == forms.len() {
                    return Ok(Step::Eval(form, env, parent));
                }
                let next = ContKind::Begin {
                    node: node.clone(),
                    env: env.clone(),
                    index: index + 1,
                };
                Ok(Step::Eval(form, env, Cont::new(next, parent)))
            }
            ContKind::Begin0 { node, env } => continue_begin0(node, env, value, 0, parent),
            ContKind::Begin0Rest {
                node,
                env,
                value: saved,
                index,
            } => continue_begin0(node, env, saved, index, parent),
            ContKind::Let {
                node,
                env,
                index,
                mut values,
            } => {
                let NodeKind::Let(l) = &node.kind else {
                    unreachable!("let continuation without let node")
                };
                push_values(&mut values, value, l.vars[index].len())?;
                if let Some(rhs) = l.rhss.get(index + 1).cloned() {
                    let next = ContKind::Let {
                        node: node.clone(),
                        env: env.clone(),
                        index: index + 1,
                        values,
                    };
                    return Ok(Step::Eval(rhs, env, Cont::new(next, parent)));
                }

                for (value, boxed) in values.iter_mut().zip(l.boxed.iter()) {
                    if *boxed {
                        let v = std::mem::replace(value, Value::Void);
                        *value = Value::Cell(Cell::new(v));
                    }
                }
                Ok(Step::Eval(l.body.clone(), Frame::new(values, env), parent))
            }
            ContKind::Letrec { node, env, index } => {
                let NodeKind::Letrec(l) = &node.kind else {
                    unreachable!("letrec continuation without letrec node")
                };
                let mut values = Vec::with_capacity(l.vars[index].len());
                push_values(&mut values, value, l.vars[index].len())?;
                let offset = l.offset(index);
                for (i, value) in values.into_iter().enumerate() {
                    let slot = crate::compiler::env::Slot {
                        depth: 0,
                        index: (offset + i) as u32,
                    };
                    Frame::lookup_cell(&env, slot)?.set(value);
                }
                if let Some(rhs) = l.rhss.get(index + 1).cloned() {
                    let next = ContKind::Letrec {
                        node: node.clone(),
                        env: env.clone(),
                        index: index + 1,
                    };
                    return Ok(Step::Eval(rhs, env, Cont::new(next, parent)));
                }
                Ok(Step::Eval(l.body.clone(), env, parent))
            }
            ContKind::SetBang { node, env } => {
                let NodeKind::SetBang(set) = &node.kind else {
                    unreachable!("set! continuation without set! node")
                };
                let value = single(value)?;
                match &set.target {
                    SetTarget::Cell(var) => {
                        let slot = var.slot.ok_or_else(|| unconverted(&var.sym))?;
                        Frame::lookup_cell(&env, slot)?.set(value);
                    }
                    SetTarget::Lexical(var) => return Err(unconverted(&var.sym)),
                    SetTarget::Module(var) => self.set_module_var(var, value)?,
                    SetTarget::Toplevel(sym) => match self.toplevel.get_mut(sym) {
                        Some(slot) => *slot = value,
                        None => {
                            return Err(RuntimeError::new(format!(
                                "set!: assignment disallowed;\n cannot set undefined\n  variable: {}",
                                sym
                            )))
                        }
                    },
                }
                Ok(Step::Return(Value::Void, parent))
            }
            ContKind::DefineValues { node } => {
                let NodeKind::DefineValues(def) = &node.kind else {
                    unreachable!("define-values continuation without define-values node")
                };
                let mut values = Vec::with_capacity(def.names.len());
                push_values(&mut values, value, def.names.len())?;
                let instance = def
                    .module
                    .as_ref()
                    .and_then(|path| self.instances.get(path))
                    .cloned();
                for (name, value) in def.names.iter().zip(values) {
                    match &instance {
                        Some(instance) => instance.define(name.clone(), value),
                        None => {
                            self.toplevel.insert(name.clone(), value);
                        }
                    }
                }
                Ok(Step::Return(Value::Void, parent))
            }
            ContKind::WcmKey { node, env } => {
                let NodeKind::WithContinuationMark(w) = &node.kind else {
                    unreachable!("mark continuation without mark node")
                };
                let next = ContKind::WcmValue {
                    node: node.clone(),
                    env: env.clone(),
                    key: single(value)?,
                };
                Ok(Step::Eval(w.value.clone(), env, Cont::new(next, parent)))
            }
            ContKind::WcmValue { node, env, key } => {
                let NodeKind::WithContinuationMark(w) = &node.kind else {
                    unreachable!("mark continuation without mark node")
                };
                let k = Cont::with_mark(&parent, key, single(value)?);
                Ok(Step::Eval(w.body.clone(), env, k))
            }
            ContKind::CallWithValues { consumer } => {
                self.apply(consumer, value.into_values(), parent)
            }
            ContKind::ModuleBody {
                module,
                instance,
                index,
            } => self.continue_module(module, instance, index, value, parent),
        }
    }

    fn start_module(&mut self, module: Rc<Module>, k: Rc<Cont>) -> ScmResult<Step> {
        if self.instances.contains_key(&module.path) {
            return Ok(Step::Return(Value::Void, k));
        }
        log::debug!(target: "vm", "instantiating {}", module.path);
        let instance = ModuleInstance::new(module.path.clone(), &module.assigned);
        self.instances.insert(module.path.clone(), instance.clone());
        self.continue_module(module, instance, 0, Value::Void, k)
    }

    fn continue_module(
        &mut self,
        module: Rc<Module>,
        instance: Rc<ModuleInstance>,
        index: usize,
        last: Value,
        k: Rc<Cont>,
    ) -> ScmResult<Step> {
        let form = match &module.lang {
            Some(lang) if index == 0 => Some(lang.clone()),
            Some(_) => module.body.get(index - 1).cloned(),
            None => module.body.get(index).cloned(),
        };
        match form {
            None => Ok(Step::Return(last, k)),
            Some(form) => {
                let next = ContKind::ModuleBody {
                    module,
                    instance,
                    index: index + 1,
                };
                Ok(Step::Eval(form, self.root.clone(), Cont::new(next, k)))
            }
        }
    }

    /// Instantiates the module at `path` unless it already is.
    pub fn require(&mut self, path: &ModulePath, k: Rc<Cont>) -> ScmResult<Step> {
        if path.is_builtin() || self.instances.contains_key(path) {
            return Ok(Step::Return(Value::Void, k));
        }
        let module = self.modules.borrow().resolve(path);
        match module {
            Some(module) => self.start_module(module, Cont::new(ContKind::Void, k)),
            None => Err(RuntimeError::new(format!(
                "require: unknown module\n  module path: {}",
                path
            ))),
        }
    }

    /// Reads a module variable. Only definitions their module never assigns
    /// are cached in the referencing node.
    pub fn lookup_module_var(&self, var: &ModuleVar) -> ScmResult<Value> {
        if let Some(value) = var.cached() {
            return Ok(value);
        }

        let primitive = || lookup_primitive(var.srcsym.as_str()).map(|p| (Value::Primitive(p), true));
        let value = match &var.srcmod {
            SourceModule::Builtin(_) => primitive(),
            SourceModule::Path(path) => self
                .instances
                .get(path)
                .and_then(|instance| {
                    let value = instance.lookup(&var.srcsym)?;
                    Some((value, !instance.is_assigned(&var.srcsym)))
                })
                .or_else(primitive),
        };

        match value {
            Some((value, cacheable)) => {
                if cacheable {
                    var.set_cache(&value);
                }
                Ok(value)
            }
            None => Err(RuntimeError::new(match &var.srcmod {
                SourceModule::Builtin(name) => {
                    format!("{}: unbound identifier in {}", var.srcsym, name)
                }
                SourceModule::Path(path) => format!(
                    "{}: undefined;\n cannot reference an identifier before its definition\n  in module: {}",
                    var.srcsym, path
                ),
            })),
        }
    }

    fn set_module_var(&mut self, var: &ModuleVar, value: Value) -> ScmResult<()> {
        let assigned = match &var.srcmod {
            SourceModule::Path(path) => self
                .instances
                .get(path)
                .map_or(false, |instance| instance.set(&var.srcsym, value)),
            SourceModule::Builtin(_) => false,
        };
        if assigned {
            Ok(())
        } else {
            Err(RuntimeError::new(format!(
                "set!: assignment disallowed;\n cannot set variable before its definition\n  variable: {}",
                var.srcsym
            )))
        }
    }

    pub fn lookup_toplevel(&self, sym: &Symbol) -> ScmResult<Value> {
        self.toplevel
            .get(sym)
            .cloned()
            .or_else(|| lookup_primitive(sym.as_str()).map(Value::Primitive))
            .ok_or_else(|| {
                RuntimeError::new(format!(
                    "{}: undefined;\n cannot reference an identifier before its definition",
                    sym
                ))
            })
    }
}

fn unconverted(sym: &Symbol) -> RuntimeError {
    RuntimeError::new(format!("{}: variable was not assignment converted", sym))
}

/// The value of a single-value context.
fn single(value: Value) -> ScmResult<Value> {
    match value {
        Value::Values(values) => Err(RuntimeError::new(format!(
            "result arity mismatch;\n expected number of values not received\n  expected: 1\n  received: {}",
            values.len()
        ))),
        value => Ok(value),
    }
}

fn push_values(out: &mut Vec<Value>, value: Value, expected: usize) -> ScmResult<()> {
    if expected == 1 {
        out.push(single(value)?);
        return Ok(());
    }
    let values = value.into_values();
    if values.len() != expected {
        return Err(RuntimeError::new(format!(
            "result arity mismatch;\n expected number of values not received\n  expected: {}\n  received: {}",
            expected,
            values.len()
        )));
    }
    out.extend(values);
    Ok(())
}

/// Evaluates the remaining operator and operands of an application, inline
/// for simple nodes, then applies.
fn continue_app(
    vm: &mut Interpreter,
    node: Ast,
    env: Env,
    mut values: Vec<Value>,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    let NodeKind::App(app) = &node.kind else {
        unreachable!("application continuation without application node")
    };
    loop {
        let index = values.len();
        let next = if index == 0 {
            &app.rator
        } else {
            match app.rands.get(index - 1) {
                Some(rand) => rand,
                None => break,
            }
        };

        if next.is_simple() {
            values.push(next.interpret_simple(&env, vm)?);
            continue;
        }

        let next = next.clone();
        let cont = ContKind::App {
            node: node.clone(),
            env: env.clone(),
            values,
        };
        return Ok(Step::Eval(next, env, Cont::new(cont, k)));
    }

    let f = values.remove(0);
    vm.apply(f, values, k)
}

fn continue_begin0(
    node: Ast,
    env: Env,
    value: Value,
    index: usize,
    k: Rc<Cont>,
) -> ScmResult<Step> {
    let NodeKind::Begin0(_, rest) = &node.kind else {
        unreachable!("begin0 continuation without begin0 node")
    };
    match rest.get(index).cloned() {
        None => Ok(Step::Return(value, k)),
        Some(form) => {
            let next = ContKind::Begin0Rest {
                node: node.clone(),
                env: env.clone(),
                value,
                index: index + 1,
            };
            Ok(Step::Eval(form, env, Cont::new(next, k)))
        }
    }
}

impl Node {
    /// Evaluates this node, producing the next step of the evaluation loop.
    pub fn interpret(
        self: &Rc<Self>,
        env: Env,
        k: Rc<Cont>,
        vm: &mut Interpreter,
    ) -> ScmResult<Step> {
        if self.is_simple() {
            return Ok(Step::Return(self.interpret_simple(&env, vm)?, k));
        }

        match &self.kind {
            NodeKind::App(_) => continue_app(vm, self.clone(), env, vec![], k),
            NodeKind::If(i) => {
                if i.test.is_simple() {
                    let branch = if i.test.interpret_simple(&env, vm)?.is_true() {
                        &i.then
                    } else {
                        &i.els
                    };
                    return Ok(Step::Eval(branch.clone(), env, k));
                }
                let next = ContKind::If {
                    node: self.clone(),
                    env: env.clone(),
                };
                Ok(Step::Eval(i.test.clone(), env, Cont::new(next, k)))
            }
            NodeKind::Begin(forms) => match forms.len() {
                0 => Ok(Step::Return(Value::Void, k)),
                1 => Ok(Step::Eval(forms[0].clone(), env, k)),
                _ => {
                    let next = ContKind::Begin {
                        node: self.clone(),
                        env: env.clone(),
                        index: 1,
                    };
                    Ok(Step::Eval(forms[0].clone(), env, Cont::new(next, k)))
                }
            },
            NodeKind::Begin0(first, _) => {
                let next = ContKind::Begin0 {
                    node: self.clone(),
                    env: env.clone(),
                };
                Ok(Step::Eval(first.clone(), env, Cont::new(next, k)))
            }
            NodeKind::Let(l) => match l.rhss.first() {
                None => Ok(Step::Eval(l.body.clone(), env, k)),
                Some(rhs) => {
                    let next = ContKind::Let {
                        node: self.clone(),
                        env: env.clone(),
                        index: 0,
                        values: Vec::with_capacity(l.binder_count()),
                    };
                    Ok(Step::Eval(rhs.clone(), env, Cont::new(next, k)))
                }
            },
            NodeKind::Letrec(l) => {
                let cells = (0..l.binder_count())
                    .map(|_| Value::Cell(Cell::new(Value::Undefined)))
                    .collect();
                let frame = Frame::new(cells, env);
                match l.rhss.first() {
                    None => Ok(Step::Eval(l.body.clone(), frame, k)),
                    Some(rhs) => {
                        let next = ContKind::Letrec {
                            node: self.clone(),
                            env: frame.clone(),
                            index: 0,
                        };
                        Ok(Step::Eval(rhs.clone(), frame, Cont::new(next, k)))
                    }
                }
            }
            NodeKind::SetBang(set) => {
                let next = ContKind::SetBang {
                    node: self.clone(),
                    env: env.clone(),
                };
                Ok(Step::Eval(set.rhs.clone(), env, Cont::new(next, k)))
            }
            NodeKind::DefineValues(def) => {
                let next = ContKind::DefineValues { node: self.clone() };
                Ok(Step::Eval(def.rhs.clone(), env, Cont::new(next, k)))
            }
            NodeKind::WithContinuationMark(w) => {
                if w.key.is_simple() && w.value.is_simple() {
                    let key = w.key.interpret_simple(&env, vm)?;
                    let value = w.value.interpret_simple(&env, vm)?;
                    return Ok(Step::Eval(w.body.clone(), env, Cont::with_mark(&k, key, value)));
                }
                let next = ContKind::WcmKey {
                    node: self.clone(),
                    env: env.clone(),
                };
                Ok(Step::Eval(w.key.clone(), env, Cont::new(next, k)))
            }
            NodeKind::Require(path) => vm.require(path, k),
            NodeKind::VariableReference(r) => {
                let variable = r.var.as_ref().and_then(|var| match &var.kind {
                    NodeKind::LexicalVar(v) | NodeKind::CellRef(v) => Some(v.sym.clone()),
                    NodeKind::ModuleVar(v) => Some(v.srcsym.clone()),
                    NodeKind::ToplevelVar(sym) => Some(sym.clone()),
                    _ => None,
                });
                let reference = VariableReference {
                    variable,
                    module: r.module.as_ref().map(|path| path.to_string()),
                };
                Ok(Step::Return(Value::VariableReference(Rc::new(reference)), k))
            }
            NodeKind::Module(_) | NodeKind::BeginForSyntax(_) => Ok(Step::Return(Value::Void, k)),
            NodeKind::Quote(_)
            | NodeKind::LexicalVar(_)
            | NodeKind::CellRef(_)
            | NodeKind::ModuleVar(_)
            | NodeKind::ToplevelVar(_)
            | NodeKind::CaseLambda(_) => unreachable!("simple nodes are handled above"),
        }
    }

    /// Value of a simple node; never allocates a continuation.
    pub fn interpret_simple(&self, env: &Env, vm: &mut Interpreter) -> ScmResult<Value> {
        match &self.kind {
            NodeKind::Quote(value) => Ok(value.clone()),
            NodeKind::LexicalVar(var) => {
                let slot = var.slot.ok_or_else(|| unconverted(&var.sym))?;
                Frame::lookup(env, slot)
            }
            NodeKind::CellRef(var) => {
                let slot = var.slot.ok_or_else(|| unconverted(&var.sym))?;
                match Frame::lookup_cell(env, slot)?.get() {
                    Value::Undefined => Err(RuntimeError::new(format!(
                        "{}: undefined;\n cannot use before initialization",
                        var.sym
                    ))),
                    value => Ok(value),
                }
            }
            NodeKind::ModuleVar(var) => vm.lookup_module_var(var),
            NodeKind::ToplevelVar(sym) => vm.lookup_toplevel(sym),
            NodeKind::CaseLambda(lambda) => lambda.make_or_retrieve_closure(env),
            _ => Err(RuntimeError::new(format!(
                "not a simple expression: {}",
                self.tostring()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::tree_il::*,
        runtime::{module::ModuleTable, value::Value},
    };

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    fn var(s: &str) -> Ast {
        make_lexical(sym(s))
    }

    fn prim(s: &str) -> Ast {
        make_module_var(ModuleVar::new(
            sym(s),
            sym(s),
            SourceModule::Builtin("#%kernel".to_owned()),
        ))
    }

    fn num(n: i64) -> Ast {
        make_quote(Value::fixnum(n))
    }

    fn run(ast: Ast) -> (ScmResult<Value>, Stats) {
        let converted = ast
            .assign_convert(&VarSet::new(), None)
            .expect("conversion failed");
        converted.set_surrounding_lambda(None);
        let mut vm = Interpreter::new(Rc::new(RefCell::new(ModuleTable::new())));
        let result = vm.eval(&converted, Frame::root());
        (result, vm.stats())
    }

    /// `(letrec ([loop (lambda (n) (if (zero? n) 'done (loop (sub1 n))))]) (loop count))`
    fn countdown(count: i64) -> Ast {
        let body = make_if(
            make_app(prim("zero?"), vec![var("n")]),
            make_quote(Value::symbol("done")),
            make_app(
                var("loop"),
                vec![make_app(prim("sub1"), vec![var("n")])],
            ),
        );
        let lambda = make_lambda(vec![sym("n")], None, vec![body]);
        make_letrec(
            vec![vec![sym("loop")]],
            vec![lambda],
            vec![make_app(var("loop"), vec![num(count)])],
        )
    }

    #[test]
    fn tail_calls_run_in_constant_space() {
        let (small, small_stats) = run(countdown(10));
        let (large, large_stats) = run(countdown(100_000));
        assert_eq!(small.unwrap().to_string(), "done");
        assert_eq!(large.unwrap().to_string(), "done");
        assert!(large_stats.steps > small_stats.steps);
        assert_eq!(small_stats.max_depth, large_stats.max_depth);
    }

    /// `(letrec ([sum (lambda (n) (if (zero? n) 0 (+ n (sum (sub1 n)))))]) (sum count))`
    fn sum(count: i64) -> Ast {
        let body = make_if(
            make_app(prim("zero?"), vec![var("n")]),
            num(0),
            make_app_let_converted(
                prim("+"),
                vec![
                    var("n"),
                    make_app(var("sum"), vec![make_app(prim("sub1"), vec![var("n")])]),
                ],
            ),
        );
        make_letrec(
            vec![vec![sym("sum")]],
            vec![make_lambda(vec![sym("n")], None, vec![body])],
            vec![make_app(var("sum"), vec![num(count)])],
        )
    }

    #[test]
    fn non_tail_recursion_grows_the_heap_chain_only() {
        // a small native stack is enough for a deep non-tail recursion
        let (result, stats) = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let (result, stats) = run(sum(50_000));
                (result.map(|v| v.to_string()).map_err(|e| e.to_string()), stats)
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(result.unwrap(), "1250025000");
        assert!(stats.max_depth >= 50_000);
    }

    #[test]
    fn closures_share_mutated_bindings() {
        // (let ([x 0])
        //   (let ([get (lambda () x)] [put (lambda (v) (set! x v))])
        //     (put 42)
        //     (get)))
        let set_x = make_set_bang(
            SetTarget::Lexical(LexicalVar {
                sym: sym("x"),
                slot: None,
            }),
            var("v"),
        );
        let inner = make_let(
            vec![vec![sym("get")], vec![sym("put")]],
            vec![
                make_lambda(vec![], None, vec![var("x")]),
                make_lambda(vec![sym("v")], None, vec![set_x]),
            ],
            vec![
                make_app(var("put"), vec![num(42)]),
                make_app(var("get"), vec![]),
            ],
        );
        let ast = make_let(
            vec![vec![sym("x")]],
            vec![make_app(prim("values"), vec![num(0)])],
            vec![inner],
        );
        assert_eq!(run(ast).0.unwrap().to_string(), "42");
    }

    #[test]
    fn errors_unwind_to_handler() {
        // (call-with-error-handler (lambda (e) (list 'caught e)) (lambda () (car 1)))
        let handler = make_lambda(
            vec![sym("e")],
            None,
            vec![make_app(
                prim("list"),
                vec![make_quote(Value::symbol("caught")), var("e")],
            )],
        );
        let thunk = make_lambda(vec![], None, vec![make_app(prim("car"), vec![num(1)])]);
        let ast = make_app(prim("call-with-error-handler"), vec![handler, thunk]);
        let result = run(ast).0.unwrap().to_string();
        assert!(result.starts_with("(caught \"car: contract violation"));

        let (result, _) = run(make_app(prim("raise"), vec![num(7)]));
        let err = result.unwrap_err();
        assert!(matches!(err.payload, Some(Value::Number(_))));
    }

    #[test]
    fn escaping_continuation_replaces_the_current_one() {
        // (+ 1 (call/cc (lambda (k) (+ 10 (k 2)))))
        let body = make_app_let_converted(
            prim("+"),
            vec![num(10), make_app(var("k"), vec![num(2)])],
        );
        let receiver = make_lambda(vec![sym("k")], None, vec![body]);
        let ast = make_app_let_converted(
            prim("+"),
            vec![num(1), make_app(prim("call/cc"), vec![receiver])],
        );
        assert_eq!(run(ast).0.unwrap().to_string(), "3");
    }

    #[test]
    fn marks_are_visible_to_callees() {
        // (with-continuation-mark 'k 1 (continuation-mark-set-first #f 'k))
        let ast = make_wcm(
            make_quote(Value::symbol("k")),
            num(1),
            make_app(
                prim("continuation-mark-set-first"),
                vec![make_quote(Value::Bool(false)), make_quote(Value::symbol("k"))],
            ),
        );
        assert_eq!(run(ast).0.unwrap().to_string(), "1");
    }

    #[test]
    fn multiple_values_bind_in_let() {
        // (let-values ([(a b) (values 1 2)]) (call-with-values (lambda () (values a b)) +))
        let producer = make_lambda(vec![], None, vec![make_app(prim("values"), vec![var("a"), var("b")])]);
        let ast = make_let(
            vec![vec![sym("a"), sym("b")]],
            vec![make_app(prim("values"), vec![num(1), num(2)])],
            vec![make_app(prim("call-with-values"), vec![producer, prim("+")])],
        );
        assert_eq!(run(ast).0.unwrap().to_string(), "3");

        let bad = make_let(
            vec![vec![sym("a")]],
            vec![make_app(prim("values"), vec![num(1), num(2)])],
            vec![var("a")],
        );
        assert!(run(bad).0.unwrap_err().message.contains("arity mismatch"));
    }

    #[test]
    fn errors_carry_lambda_source_location() {
        let body = make_app(prim("car"), vec![num(1)]);
        let lambda = make_case_lambda(
            vec![Lambda {
                formals: vec![],
                rest: None,
                body,
                boxed: vec![],
            }],
            Some(crate::runtime::error::SourceLocation {
                position: 17,
                file: Some(Rc::from("t.rkt")),
            }),
        );
        let err = run(make_app(lambda, vec![])).0.unwrap_err();
        assert_eq!(err.srcloc.map(|l| l.position), Some(17));
    }

    #[test]
    fn delivery_errors_carry_lambda_source_location() {
        // (lambda () (let-values ([(a) (values 1 2)]) a)) at position 23
        let body = make_let(
            vec![vec![sym("a")]],
            vec![make_app(prim("values"), vec![num(1), num(2)])],
            vec![var("a")],
        );
        let lambda = make_case_lambda(
            vec![Lambda {
                formals: vec![],
                rest: None,
                body,
                boxed: vec![],
            }],
            Some(crate::runtime::error::SourceLocation {
                position: 23,
                file: Some(Rc::from("t.rkt")),
            }),
        );
        let err = run(make_app(lambda, vec![])).0.unwrap_err();
        assert!(err.message.contains("arity mismatch"), "{}", err);
        assert_eq!(err.srcloc.map(|l| l.position), Some(23));
    }
}
