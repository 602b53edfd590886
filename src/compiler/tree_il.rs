//! Tree IL: the syntax tree consumed by the analyzer, the converter and the
//! evaluator.
//!
//! Nodes are immutable once built. Every transformation produces a new tree,
//! so derived data (free and mutated variable sets, the printed form) is
//! memoized per node and only needs [`Node::clear_caches`] when a tree is
//! reused after its variable structure was reinterpreted.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use indexmap::{IndexMap, IndexSet};
use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::{Color, ColorSpec, WriteColor};

use crate::runtime::{
    environment::Frame, error::SourceLocation, module::ModulePath, symbol::Symbol, value::Value,
};

use super::env::Slot;

/// Ordered set of variables. The order of a lambda's free variables fixes the
/// layout of its closures.
pub type VarSet = IndexSet<Symbol>;

pub type Ast = Rc<Node>;

pub struct Node {
    pub kind: NodeKind,
    pub(crate) free_vars: RefCell<Option<Rc<VarSet>>>,
    pub(crate) mutated_vars: RefCell<Option<Rc<VarSet>>>,
    repr: RefCell<Option<Rc<str>>>,
    surrounding_lambda: Cell<Option<LambdaId>>,
}

pub enum NodeKind {
    Quote(Value),
    /// Reference to a lexical variable. `slot` is filled in by assignment
    /// conversion.
    LexicalVar(LexicalVar),
    /// Read through the cell of a boxed lexical variable.
    CellRef(LexicalVar),
    ModuleVar(ModuleVar),
    ToplevelVar(Symbol),
    SetBang(SetBang),
    CaseLambda(Rc<CaseLambda>),
    App(App),
    If(If),
    Begin(Vec<Ast>),
    Begin0(Ast, Vec<Ast>),
    Let(Let),
    Letrec(Let),
    DefineValues(DefineValues),
    Module(Rc<Module>),
    Require(ModulePath),
    VariableReference(VariableRef),
    WithContinuationMark(Wcm),
    BeginForSyntax(Vec<Ast>),
}

#[derive(Clone)]
pub struct LexicalVar {
    pub sym: Symbol,
    pub slot: Option<Slot>,
}

/// Where a module variable comes from.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SourceModule {
    /// A `#%`-prefixed module implemented by the primitive table.
    Builtin(String),
    Path(ModulePath),
}

pub struct ModuleVar {
    /// Name the variable is known by at the reference site.
    pub name: Symbol,
    /// Name of the definition in the source module.
    pub srcsym: Symbol,
    pub srcmod: SourceModule,
    /// Value of a definition its module never assigns, filled on first read.
    cache: RefCell<Option<Value>>,
}

impl ModuleVar {
    pub fn new(name: Symbol, srcsym: Symbol, srcmod: SourceModule) -> Self {
        Self {
            name,
            srcsym,
            srcmod,
            cache: RefCell::new(None),
        }
    }

    /// The same variable with an empty cache.
    pub fn uncached(&self) -> Self {
        Self::new(self.name.clone(), self.srcsym.clone(), self.srcmod.clone())
    }

    pub fn cached(&self) -> Option<Value> {
        self.cache.borrow().clone()
    }

    pub fn set_cache(&self, value: &Value) {
        *self.cache.borrow_mut() = Some(value.clone());
    }
}

pub enum SetTarget {
    /// Unconverted assignment to a lexical variable.
    Lexical(LexicalVar),
    /// Write through the cell of a boxed lexical variable.
    Cell(LexicalVar),
    Module(ModuleVar),
    Toplevel(Symbol),
}

impl SetTarget {
    pub fn name(&self) -> &Symbol {
        match self {
            SetTarget::Lexical(var) | SetTarget::Cell(var) => &var.sym,
            SetTarget::Module(var) => &var.srcsym,
            SetTarget::Toplevel(sym) => sym,
        }
    }
}

pub struct SetBang {
    pub target: SetTarget,
    pub rhs: Ast,
}

/// What a closure frame slot is filled with when the closure is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    Slot(Slot),
    /// The closure itself, for recursive lambdas.
    Itself,
}

pub struct Lambda {
    pub formals: Vec<Symbol>,
    pub rest: Option<Symbol>,
    pub body: Ast,
    /// Per parameter (formals then rest): whether the frame slot holds a cell.
    /// Empty before conversion.
    pub boxed: Vec<bool>,
}

impl Lambda {
    pub fn params(&self) -> impl Iterator<Item = &Symbol> {
        self.formals.iter().chain(self.rest.iter())
    }

    pub fn accepts(&self, argc: usize) -> bool {
        if self.rest.is_some() {
            argc >= self.formals.len()
        } else {
            argc == self.formals.len()
        }
    }
}

pub(crate) enum ClosureCache {
    Empty,
    /// Closure of a lambda that captures nothing from its environment. Held
    /// weakly: the closure frame owns the lambda.
    Constant(Weak<Frame>),
    /// Last closure built, keyed by the identity of the environment it was
    /// built against.
    Keyed {
        env: Weak<Frame>,
        closure: Weak<Frame>,
    },
}

pub struct CaseLambda {
    pub id: LambdaId,
    pub arms: Vec<Lambda>,
    /// Binding symbol of a recursive lambda; references to it inside the body
    /// denote the closure itself.
    pub recursive_sym: Option<Symbol>,
    pub srcloc: Option<SourceLocation>,
    /// Closure frame layout, fixed by assignment conversion.
    pub captures: Vec<Capture>,
    self_index: Option<usize>,
    pub(crate) cache: RefCell<ClosureCache>,
}

impl CaseLambda {
    pub fn new(
        arms: Vec<Lambda>,
        recursive_sym: Option<Symbol>,
        srcloc: Option<SourceLocation>,
        captures: Vec<Capture>,
    ) -> Rc<Self> {
        let self_index = captures.iter().position(|c| *c == Capture::Itself);
        Rc::new_cyclic(|weak| Self {
            id: LambdaId::register(weak.clone()),
            arms,
            recursive_sym,
            srcloc,
            captures,
            self_index,
            cache: RefCell::new(ClosureCache::Empty),
        })
    }

    /// Frame index holding the closure itself, if the closure refers to
    /// itself.
    pub fn recursive_index(&self) -> Option<usize> {
        self.self_index
    }

    pub fn select_arm(&self, argc: usize) -> Option<&Lambda> {
        self.arms.iter().find(|arm| arm.accepts(argc))
    }

    pub fn arity_string(&self) -> String {
        let arities: Vec<String> = self
            .arms
            .iter()
            .map(|arm| match arm.rest {
                Some(_) => format!("at least {}", arm.formals.len()),
                None => arm.formals.len().to_string(),
            })
            .collect();
        arities.join(" or ")
    }
}

/// Index of a lambda in the per-thread lambda registry. Nodes refer to their
/// enclosing lambda through this id instead of a pointer.
///
/// Slots of dropped lambdas are reused; the generation tells a stale id from
/// the id of the slot's current lambda.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LambdaId {
    index: u32,
    generation: u32,
}

#[derive(Default)]
struct LambdaRegistry {
    slots: Vec<(Weak<CaseLambda>, u32)>,
    free: Vec<u32>,
}

impl LambdaRegistry {
    fn register(&mut self, lambda: Weak<CaseLambda>) -> LambdaId {
        if self.free.is_empty() && self.slots.len() == self.slots.capacity() {
            self.sweep();
        }
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.0 = lambda;
                slot.1 = slot.1.wrapping_add(1);
                LambdaId {
                    index,
                    generation: slot.1,
                }
            }
            None => {
                self.slots.push((lambda, 0));
                LambdaId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Collects the slots whose lambda was dropped.
    fn sweep(&mut self) {
        self.free.extend(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, (lambda, _))| lambda.strong_count() == 0)
                .map(|(index, _)| index as u32),
        );
        log::trace!(target: "compiler", "lambda registry: {} of {} slots free", self.free.len(), self.slots.len());
    }

    fn live(&self) -> usize {
        self.slots.iter().filter(|(lambda, _)| lambda.strong_count() > 0).count()
    }
}

thread_local! {
    static LAMBDAS: RefCell<LambdaRegistry> = RefCell::new(LambdaRegistry::default());
}

impl LambdaId {
    fn register(lambda: Weak<CaseLambda>) -> Self {
        LAMBDAS.with(|lambdas| lambdas.borrow_mut().register(lambda))
    }

    pub fn get(self) -> Option<Rc<CaseLambda>> {
        LAMBDAS.with(|lambdas| {
            lambdas
                .borrow()
                .slots
                .get(self.index as usize)
                .filter(|(_, generation)| *generation == self.generation)
                .and_then(|(lambda, _)| lambda.upgrade())
        })
    }

    /// Lambdas of this thread that are still alive.
    pub fn live_count() -> usize {
        LAMBDAS.with(|lambdas| lambdas.borrow().live())
    }

    /// Registry slots allocated by this thread.
    pub fn slot_count() -> usize {
        LAMBDAS.with(|lambdas| lambdas.borrow().slots.len())
    }
}

pub struct App {
    pub rator: Ast,
    pub rands: Vec<Ast>,
}

pub struct If {
    pub test: Ast,
    pub then: Ast,
    pub els: Ast,
}

/// Shared by `let-values` and `letrec-values`.
pub struct Let {
    pub vars: Vec<Vec<Symbol>>,
    pub rhss: Vec<Ast>,
    pub body: Ast,
    /// Flattened per binder: whether the frame slot holds a cell. Empty before
    /// conversion.
    pub boxed: Vec<bool>,
}

impl Let {
    pub fn binders(&self) -> impl Iterator<Item = &Symbol> {
        self.vars.iter().flatten()
    }

    pub fn binder_count(&self) -> usize {
        self.vars.iter().map(Vec::len).sum()
    }

    /// Index of the first frame slot bound by right-hand side `index`.
    pub fn offset(&self, index: usize) -> usize {
        self.vars[..index].iter().map(Vec::len).sum()
    }
}

pub struct DefineValues {
    pub names: Vec<Symbol>,
    pub rhs: Ast,
    /// Names as written in the source, used for printing.
    pub display_names: Vec<Symbol>,
    /// Module the definitions belong to, `None` for the toplevel.
    pub module: Option<ModulePath>,
}

pub struct VariableRef {
    pub var: Option<Ast>,
    pub module: Option<ModulePath>,
}

pub struct Wcm {
    pub key: Ast,
    pub value: Ast,
    pub body: Ast,
}

pub struct Module {
    pub name: String,
    pub path: ModulePath,
    pub body: Vec<Ast>,
    pub config: IndexMap<String, String>,
    /// Require of the module language, run before the body.
    pub lang: Option<Ast>,
    /// Every lambda in the module body, filled in after conversion.
    pub lambdas: Vec<LambdaId>,
    /// Definitions of this module that some `set!` in it assigns.
    pub assigned: VarSet,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("forms", &self.body.len())
            .finish()
    }
}

impl Module {
    pub fn new(
        name: String,
        path: ModulePath,
        body: Vec<Ast>,
        config: IndexMap<String, String>,
        lang: Option<Ast>,
    ) -> Self {
        Self {
            name,
            path,
            body,
            config,
            lang,
            lambdas: Vec::new(),
            assigned: VarSet::new(),
        }
    }

    pub fn submodules(&self) -> impl Iterator<Item = &Rc<Module>> {
        self.body.iter().filter_map(|form| match &form.kind {
            NodeKind::Module(m) => Some(m),
            _ => None,
        })
    }

    /// Follows a chain of submodule names starting at this module.
    pub fn resolve_submodule_path(self: &Rc<Self>, path: &[String]) -> Option<Rc<Module>> {
        let mut module = self.clone();
        for name in path {
            let next = module.submodules().find(|m| &m.name == name)?.clone();
            module = next;
        }
        Some(module)
    }
}

impl Node {
    pub fn new(kind: NodeKind) -> Ast {
        Rc::new(Self {
            kind,
            free_vars: RefCell::new(None),
            mutated_vars: RefCell::new(None),
            repr: RefCell::new(None),
            surrounding_lambda: Cell::new(None),
        })
    }

    pub fn surrounding_lambda(&self) -> Option<LambdaId> {
        self.surrounding_lambda.get()
    }

    /// Source location of the innermost lambda containing this node.
    pub fn srcloc(&self) -> Option<SourceLocation> {
        self.surrounding_lambda
            .get()
            .and_then(LambdaId::get)
            .and_then(|lambda| lambda.srcloc.clone())
    }

    /// Nodes that evaluate without allocating a continuation.
    pub fn is_simple(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Quote(_)
                | NodeKind::LexicalVar(_)
                | NodeKind::CellRef(_)
                | NodeKind::ModuleVar(_)
                | NodeKind::ToplevelVar(_)
                | NodeKind::CaseLambda(_)
        )
    }

    pub fn direct_children(&self) -> Vec<&Ast> {
        match &self.kind {
            NodeKind::Quote(_)
            | NodeKind::LexicalVar(_)
            | NodeKind::CellRef(_)
            | NodeKind::ModuleVar(_)
            | NodeKind::ToplevelVar(_)
            | NodeKind::Require(_) => vec![],
            NodeKind::SetBang(set) => vec![&set.rhs],
            NodeKind::CaseLambda(lambda) => lambda.arms.iter().map(|arm| &arm.body).collect(),
            NodeKind::App(app) => std::iter::once(&app.rator).chain(app.rands.iter()).collect(),
            NodeKind::If(i) => vec![&i.test, &i.then, &i.els],
            NodeKind::Begin(forms) | NodeKind::BeginForSyntax(forms) => forms.iter().collect(),
            NodeKind::Begin0(first, rest) => std::iter::once(first).chain(rest.iter()).collect(),
            NodeKind::Let(l) | NodeKind::Letrec(l) => {
                l.rhss.iter().chain(std::iter::once(&l.body)).collect()
            }
            NodeKind::DefineValues(def) => vec![&def.rhs],
            NodeKind::Module(module) => module.lang.iter().chain(module.body.iter()).collect(),
            NodeKind::VariableReference(r) => r.var.iter().collect(),
            NodeKind::WithContinuationMark(w) => vec![&w.key, &w.value, &w.body],
        }
    }

    /// Drops every memoized derived value in this subtree.
    pub fn clear_caches(&self) {
        let mut stack: Vec<&Node> = vec![self];
        while let Some(node) = stack.pop() {
            node.free_vars.borrow_mut().take();
            node.mutated_vars.borrow_mut().take();
            node.repr.borrow_mut().take();
            stack.extend(node.direct_children().into_iter().map(|child| &**child));
        }
    }

    /// Records `lambda` as the enclosing lambda of every node below this one,
    /// nested lambdas record themselves for their own bodies.
    pub fn set_surrounding_lambda(&self, lambda: Option<LambdaId>) {
        let mut stack: Vec<(&Node, Option<LambdaId>)> = vec![(self, lambda)];
        while let Some((node, lambda)) = stack.pop() {
            node.surrounding_lambda.set(lambda);
            let inner = match &node.kind {
                NodeKind::CaseLambda(l) => Some(l.id),
                // submodules are annotated when they are converted
                NodeKind::Module(_) => continue,
                _ => lambda,
            };
            stack.extend(node.direct_children().into_iter().map(|c| (&**c, inner)));
        }
    }

    /// Lambdas contained in this subtree, outermost first.
    pub fn collect_lambdas(&self, out: &mut Vec<LambdaId>) {
        let mut stack: Vec<&Node> = vec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                NodeKind::Module(_) => continue,
                NodeKind::CaseLambda(l) => out.push(l.id),
                _ => (),
            }
            stack.extend(node.direct_children().into_iter().rev().map(|c| &**c));
        }
    }

    pub fn tostring(&self) -> Rc<str> {
        if let Some(repr) = self.repr.borrow().as_ref() {
            return repr.clone();
        }

        let allocator = BoxAllocator;
        let mut out = String::new();
        let _ = self
            .pretty(&allocator)
            .1
            .render_fmt(80, &mut out);
        let repr: Rc<str> = Rc::from(out);
        *self.repr.borrow_mut() = Some(repr.clone());
        repr
    }

    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match &self.kind {
            NodeKind::Quote(value) => match value {
                Value::Symbol(_) | Value::Pair(_) | Value::Null => {
                    allocator.text(format!("'{}", value))
                }
                _ => allocator.text(value.to_string()),
            }
            .annotate(fg(Color::Cyan)),
            NodeKind::LexicalVar(var) => allocator.text(var.sym.to_string()),
            NodeKind::CellRef(var) => allocator
                .text(var.sym.to_string())
                .annotate(fg(Color::Magenta)),
            NodeKind::ModuleVar(var) => allocator.text(var.name.to_string()),
            NodeKind::ToplevelVar(sym) => allocator.text(format!("$top.{}", sym)),
            NodeKind::SetBang(set) => form(
                allocator,
                "set!",
                vec![
                    allocator.text(set.target.name().to_string()),
                    set.rhs.pretty(allocator),
                ],
            ),
            NodeKind::CaseLambda(lambda) => {
                let arm_doc = |arm: &Lambda| {
                    let formals: Vec<_> = arm
                        .formals
                        .iter()
                        .map(|f| allocator.text(f.to_string()))
                        .collect();
                    let formals = match &arm.rest {
                        None if arm.formals.is_empty() => allocator.text("()"),
                        None => allocator.intersperse(formals, allocator.space()).parens(),
                        Some(rest) if arm.formals.is_empty() => allocator.text(rest.to_string()),
                        Some(rest) => allocator
                            .intersperse(formals, allocator.space())
                            .append(allocator.text(format!(" . {}", rest)))
                            .parens(),
                    };
                    (formals, arm.body.pretty(allocator))
                };

                if lambda.arms.len() == 1 {
                    let (formals, body) = arm_doc(&lambda.arms[0]);
                    form(allocator, "lambda", vec![formals, body])
                } else {
                    let arms = lambda
                        .arms
                        .iter()
                        .map(|arm| {
                            let (formals, body) = arm_doc(arm);
                            formals
                                .append(allocator.line())
                                .append(body)
                                .nest(1)
                                .group()
                                .brackets()
                        })
                        .collect();
                    form(allocator, "case-lambda", arms)
                }
            }
            NodeKind::App(app) => allocator
                .intersperse(
                    std::iter::once(&app.rator)
                        .chain(app.rands.iter())
                        .map(|x| x.pretty(allocator)),
                    allocator.line(),
                )
                .nest(1)
                .group()
                .parens(),
            NodeKind::If(i) => form(
                allocator,
                "if",
                vec![
                    i.test.pretty(allocator),
                    i.then.pretty(allocator),
                    i.els.pretty(allocator),
                ],
            ),
            NodeKind::Begin(forms) => form(
                allocator,
                "begin",
                forms.iter().map(|f| f.pretty(allocator)).collect(),
            ),
            NodeKind::BeginForSyntax(forms) => form(
                allocator,
                "begin-for-syntax",
                forms.iter().map(|f| f.pretty(allocator)).collect(),
            ),
            NodeKind::Begin0(first, rest) => form(
                allocator,
                "begin0",
                std::iter::once(first)
                    .chain(rest.iter())
                    .map(|f| f.pretty(allocator))
                    .collect(),
            ),
            NodeKind::Let(l) | NodeKind::Letrec(l) => {
                let name = if let NodeKind::Let(_) = self.kind {
                    "let-values"
                } else {
                    "letrec-values"
                };
                let bindings = allocator
                    .intersperse(
                        l.vars.iter().zip(l.rhss.iter()).map(|(vars, rhs)| {
                            let vars = allocator
                                .intersperse(
                                    vars.iter().map(|v| allocator.text(v.to_string())),
                                    allocator.space(),
                                )
                                .parens();
                            vars.append(allocator.space())
                                .append(rhs.pretty(allocator))
                                .group()
                                .brackets()
                        }),
                        allocator.line(),
                    )
                    .parens();
                form(allocator, name, vec![bindings, l.body.pretty(allocator)])
            }
            NodeKind::DefineValues(def) => form(
                allocator,
                "define-values",
                vec![
                    allocator
                        .intersperse(
                            def.display_names
                                .iter()
                                .map(|v| allocator.text(v.to_string())),
                            allocator.space(),
                        )
                        .parens(),
                    def.rhs.pretty(allocator),
                ],
            ),
            NodeKind::Module(module) => {
                let mut docs = vec![allocator.text(module.name.clone())];
                docs.extend(module.body.iter().map(|f| f.pretty(allocator)));
                form(allocator, "module", docs)
            }
            NodeKind::Require(path) => form(allocator, "#%require", vec![allocator.text(path.to_string())]),
            NodeKind::VariableReference(r) => form(
                allocator,
                "#%variable-reference",
                r.var.iter().map(|v| v.pretty(allocator)).collect(),
            ),
            NodeKind::WithContinuationMark(w) => form(
                allocator,
                "with-continuation-mark",
                vec![
                    w.key.pretty(allocator),
                    w.value.pretty(allocator),
                    w.body.pretty(allocator),
                ],
            ),
        }
    }

    pub fn pretty_print(&self, mut out: impl WriteColor) -> std::io::Result<()> {
        let allocator = BoxAllocator;
        self.pretty(&allocator)
            .1
            .render_colored(80, &mut out)?;
        writeln!(out)
    }
}

fn fg(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color));
    spec
}

fn kw(color: Color) -> ColorSpec {
    let mut spec = fg(color);
    spec.set_bold(true);
    spec
}

/// `(keyword arg ...)` with the keyword highlighted.
fn form<'a, D>(
    allocator: &'a D,
    keyword: &'static str,
    args: Vec<DocBuilder<'a, D, ColorSpec>>,
) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    args.into_iter()
        .fold(
            allocator.text(keyword).annotate(kw(Color::Blue)),
            |doc, arg| doc.append(allocator.line()).append(arg),
        )
        .nest(1)
        .group()
        .parens()
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tostring())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tostring())
    }
}

pub fn make_quote(value: Value) -> Ast {
    Node::new(NodeKind::Quote(value))
}

pub fn make_void() -> Ast {
    make_quote(Value::Void)
}

pub fn make_lexical(sym: Symbol) -> Ast {
    Node::new(NodeKind::LexicalVar(LexicalVar { sym, slot: None }))
}

pub fn make_module_var(var: ModuleVar) -> Ast {
    Node::new(NodeKind::ModuleVar(var))
}

pub fn make_toplevel(sym: Symbol) -> Ast {
    Node::new(NodeKind::ToplevelVar(sym))
}

pub fn make_set_bang(target: SetTarget, rhs: Ast) -> Ast {
    Node::new(NodeKind::SetBang(SetBang { target, rhs }))
}

pub fn make_lambda(formals: Vec<Symbol>, rest: Option<Symbol>, body: Vec<Ast>) -> Ast {
    make_case_lambda(
        vec![Lambda {
            formals,
            rest,
            body: make_begin(body),
            boxed: vec![],
        }],
        None,
    )
}

pub fn make_case_lambda(arms: Vec<Lambda>, srcloc: Option<SourceLocation>) -> Ast {
    Node::new(NodeKind::CaseLambda(CaseLambda::new(arms, None, srcloc, vec![])))
}

pub fn make_app(rator: Ast, rands: Vec<Ast>) -> Ast {
    Node::new(NodeKind::App(App { rator, rands }))
}

/// Builds an application whose operator and operands are all simple, binding
/// the non-simple ones to fresh temporaries first. Everything up to the last
/// non-simple position that is not a literal or lambda is bound so the
/// left-to-right evaluation order is kept.
pub fn make_app_let_converted(rator: Ast, rands: Vec<Ast>) -> Ast {
    let all: Vec<Ast> = std::iter::once(rator).chain(rands).collect();
    let Some(last) = all.iter().rposition(|x| !x.is_simple()) else {
        let mut all = all.into_iter();
        let rator = all.next().unwrap_or_else(make_void);
        return make_app(rator, all.collect());
    };

    let mut vars = Vec::new();
    let mut rhss = Vec::new();
    let mut args = Vec::with_capacity(all.len());
    for (i, x) in all.into_iter().enumerate() {
        let pure = matches!(x.kind, NodeKind::Quote(_) | NodeKind::CaseLambda(_));
        if i <= last && !pure {
            let tmp = Symbol::gensym("AppRand");
            args.push(make_lexical(tmp.clone()));
            vars.push(vec![tmp]);
            rhss.push(x);
        } else {
            args.push(x);
        }
    }

    let mut args = args.into_iter();
    let rator = args.next().unwrap_or_else(make_void);
    make_let(vars, rhss, vec![make_app(rator, args.collect())])
}

pub fn make_if(test: Ast, then: Ast, els: Ast) -> Ast {
    Node::new(NodeKind::If(If { test, then, els }))
}

/// Conditional whose test is bound to a temporary when it is not simple.
pub fn make_if_let_converted(test: Ast, then: Ast, els: Ast) -> Ast {
    if test.is_simple() {
        return make_if(test, then, els);
    }
    let tmp = Symbol::gensym("if_");
    make_let(
        vec![vec![tmp.clone()]],
        vec![test],
        vec![make_if(make_lexical(tmp), then, els)],
    )
}

/// A sequence of forms. A single form is returned as is, an empty sequence
/// evaluates to void.
pub fn make_begin(mut forms: Vec<Ast>) -> Ast {
    match forms.len() {
        0 => make_void(),
        1 => forms.pop().unwrap_or_else(make_void),
        _ => Node::new(NodeKind::Begin(forms)),
    }
}

pub fn make_begin0(first: Ast, rest: Vec<Ast>) -> Ast {
    if rest.is_empty() {
        return first;
    }
    Node::new(NodeKind::Begin0(first, rest))
}

pub fn make_let(vars: Vec<Vec<Symbol>>, rhss: Vec<Ast>, body: Vec<Ast>) -> Ast {
    Node::new(NodeKind::Let(Let {
        vars,
        rhss,
        body: make_begin(body),
        boxed: vec![],
    }))
}

pub fn make_letrec(vars: Vec<Vec<Symbol>>, rhss: Vec<Ast>, body: Vec<Ast>) -> Ast {
    Node::new(NodeKind::Letrec(Let {
        vars,
        rhss,
        body: make_begin(body),
        boxed: vec![],
    }))
}

pub fn make_define_values(
    names: Vec<Symbol>,
    rhs: Ast,
    display_names: Vec<Symbol>,
    module: Option<ModulePath>,
) -> Ast {
    Node::new(NodeKind::DefineValues(DefineValues {
        names,
        rhs,
        display_names,
        module,
    }))
}

pub fn make_module(module: Module) -> Ast {
    Node::new(NodeKind::Module(Rc::new(module)))
}

pub fn make_require(path: ModulePath) -> Ast {
    Node::new(NodeKind::Require(path))
}

pub fn make_variable_reference(var: Option<Ast>, module: Option<ModulePath>) -> Ast {
    Node::new(NodeKind::VariableReference(VariableRef { var, module }))
}

pub fn make_wcm(key: Ast, value: Ast, body: Ast) -> Ast {
    Node::new(NodeKind::WithContinuationMark(Wcm { key, value, body }))
}

pub fn make_begin_for_syntax(forms: Vec<Ast>) -> Ast {
    Node::new(NodeKind::BeginForSyntax(forms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    #[test]
    fn prints_surface_syntax() {
        let lambda = make_lambda(
            vec![sym("x")],
            None,
            vec![make_set_bang(
                SetTarget::Lexical(LexicalVar {
                    sym: sym("x"),
                    slot: None,
                }),
                make_quote(Value::fixnum(2)),
            )],
        );
        assert_eq!(&*lambda.tostring(), "(lambda (x) (set! x 2))");
        assert!(Rc::ptr_eq(&lambda.tostring(), &lambda.tostring()));
    }

    #[test]
    fn let_converts_non_simple_operands() {
        let inner = make_app(make_lexical(sym("g")), vec![]);
        let app = make_app_let_converted(
            make_lexical(sym("f")),
            vec![inner, make_quote(Value::fixnum(1))],
        );
        let NodeKind::Let(l) = &app.kind else {
            panic!("expected a let, got {}", app);
        };
        // the operator is bound too since it precedes the call
        assert_eq!(l.vars.len(), 2);
        let NodeKind::App(body) = &l.body.kind else {
            panic!("expected an application body");
        };
        assert!(body.rator.is_simple());
        assert!(body.rands.iter().all(|r| r.is_simple()));

        let simple = make_app_let_converted(make_lexical(sym("f")), vec![make_lexical(sym("x"))]);
        assert!(matches!(simple.kind, NodeKind::App(_)));
    }

    #[test]
    fn surrounding_lambda_is_innermost() {
        let inner_body = make_lexical(sym("y"));
        let inner = make_lambda(vec![sym("y")], None, vec![inner_body]);
        let outer_body = make_app(inner.clone(), vec![make_lexical(sym("x"))]);
        let outer = make_lambda(vec![sym("x")], None, vec![outer_body.clone()]);
        outer.set_surrounding_lambda(None);

        let (NodeKind::CaseLambda(o), NodeKind::CaseLambda(i)) = (&outer.kind, &inner.kind) else {
            unreachable!()
        };
        assert_eq!(outer.surrounding_lambda(), None);
        assert_eq!(outer_body.surrounding_lambda(), Some(o.id));
        assert_eq!(i.arms[0].body.surrounding_lambda(), Some(i.id));
        assert!(Rc::ptr_eq(&i.id.get().unwrap(), i));

        let mut ids = vec![];
        outer.collect_lambdas(&mut ids);
        assert_eq!(ids, vec![o.id, i.id]);
    }

    #[test]
    fn dropped_lambdas_free_their_registry_slot() {
        let lambda = || make_lambda(vec![sym("x")], None, vec![make_lexical(sym("x"))]);
        let kept = lambda();
        let NodeKind::CaseLambda(kept_code) = &kept.kind else {
            unreachable!()
        };

        let first = lambda();
        let NodeKind::CaseLambda(code) = &first.kind else {
            unreachable!()
        };
        let stale = code.id;
        drop(first);
        assert!(stale.get().is_none());

        for _ in 0..10_000 {
            drop(lambda());
        }
        assert!(LambdaId::slot_count() < 64, "{} slots", LambdaId::slot_count());
        assert!(stale.get().is_none());
        assert!(Rc::ptr_eq(&kept_code.id.get().unwrap(), kept_code));
        assert!(LambdaId::live_count() >= 1);
    }
}
