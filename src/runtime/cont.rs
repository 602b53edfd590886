//! Continuations.
//!
//! The rest of a computation is an immutable linked chain of frames. A frame
//! records what to do with the value delivered to it plus the state gathered
//! so far, and links to its parent. Chains are shared freely: capturing a
//! continuation is an `Rc` clone.

use std::rc::Rc;

use crate::compiler::tree_il::{Ast, Module};

use super::{environment::Env, module::ModuleInstance, value::Value};

#[derive(Clone)]
pub enum ContKind {
    /// Bottom of the chain. Delivering here ends evaluation.
    Done,
    /// Evaluating the operator and operands of an application.
    App {
        node: Ast,
        env: Env,
        values: Vec<Value>,
    },
    If {
        node: Ast,
        env: Env,
    },
    /// Form `index` of a `begin` is next.
    Begin {
        node: Ast,
        env: Env,
        index: usize,
    },
    Begin0 {
        node: Ast,
        env: Env,
    },
    Begin0Rest {
        node: Ast,
        env: Env,
        value: Value,
        index: usize,
    },
    /// Right-hand side `index` of a `let` was evaluated.
    Let {
        node: Ast,
        env: Env,
        index: usize,
        values: Vec<Value>,
    },
    /// Right-hand side `index` of a `letrec` was evaluated; `env` is the frame
    /// of cells being filled.
    Letrec {
        node: Ast,
        env: Env,
        index: usize,
    },
    SetBang {
        node: Ast,
        env: Env,
    },
    DefineValues {
        node: Ast,
    },
    WcmKey {
        node: Ast,
        env: Env,
    },
    WcmValue {
        node: Ast,
        env: Env,
        key: Value,
    },
    /// Continuation marks attached to the parent continuation.
    Marks {
        marks: Vec<(Value, Value)>,
    },
    /// Errors raised below this frame are passed to `handler`.
    Handler {
        handler: Value,
    },
    CallWithValues {
        consumer: Value,
    },
    /// Body form `index` of a module instance was evaluated.
    ModuleBody {
        module: Rc<Module>,
        instance: Rc<ModuleInstance>,
        index: usize,
    },
    /// Discards the delivered value and returns void.
    Void,
}

impl ContKind {
    /// The node whose evaluation this frame continues.
    pub fn node(&self) -> Option<&Ast> {
        match self {
            ContKind::App { node, .. }
            | ContKind::If { node, .. }
            | ContKind::Begin { node, .. }
            | ContKind::Begin0 { node, .. }
            | ContKind::Begin0Rest { node, .. }
            | ContKind::Let { node, .. }
            | ContKind::Letrec { node, .. }
            | ContKind::SetBang { node, .. }
            | ContKind::DefineValues { node }
            | ContKind::WcmKey { node, .. }
            | ContKind::WcmValue { node, .. } => Some(node),
            ContKind::Done
            | ContKind::Marks { .. }
            | ContKind::Handler { .. }
            | ContKind::CallWithValues { .. }
            | ContKind::ModuleBody { .. }
            | ContKind::Void => None,
        }
    }
}

pub struct Cont {
    pub kind: ContKind,
    parent: Option<Rc<Cont>>,
    depth: usize,
}

impl Cont {
    pub fn done() -> Rc<Self> {
        Rc::new(Self {
            kind: ContKind::Done,
            parent: None,
            depth: 0,
        })
    }

    pub fn new(kind: ContKind, parent: Rc<Cont>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            depth: parent.depth + 1,
            parent: Some(parent),
        })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.kind, ContKind::Done)
    }

    /// Length of the chain below this frame.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<&Rc<Cont>> {
        self.parent.as_ref()
    }

    /// Takes the frame apart, reusing its state when nothing else refers to
    /// it.
    pub fn unpack(this: Rc<Cont>) -> (ContKind, Rc<Cont>) {
        match Rc::try_unwrap(this) {
            Ok(mut cont) => {
                let kind = std::mem::replace(&mut cont.kind, ContKind::Done);
                let parent = cont.parent.take().unwrap_or_else(Cont::done);
                (kind, parent)
            }
            Err(shared) => (
                shared.kind.clone(),
                shared.parent.clone().unwrap_or_else(Cont::done),
            ),
        }
    }

    /// Continuation with mark `key` set to `value`. Marking a continuation
    /// that already is a mark frame updates that frame instead of growing the
    /// chain.
    pub fn with_mark(this: &Rc<Cont>, key: Value, value: Value) -> Rc<Cont> {
        if let (ContKind::Marks { marks }, Some(parent)) = (&this.kind, &this.parent) {
            let mut marks = marks.clone();
            match marks.iter_mut().find(|(k, _)| super::value::eq(k, &key)) {
                Some(entry) => entry.1 = value,
                None => marks.push((key, value)),
            }
            return Rc::new(Self {
                kind: ContKind::Marks { marks },
                parent: Some(parent.clone()),
                depth: this.depth,
            });
        }

        Cont::new(
            ContKind::Marks {
                marks: vec![(key, value)],
            },
            this.clone(),
        )
    }

    /// Values of mark `key`, innermost first.
    pub fn marks(this: &Rc<Cont>, key: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        let mut current = Some(this);
        while let Some(cont) = current {
            if let ContKind::Marks { marks } = &cont.kind {
                if let Some((_, v)) = marks.iter().find(|(k, _)| super::value::eq(k, key)) {
                    out.push(v.clone());
                }
            }
            current = cont.parent.as_ref();
        }
        out
    }

    pub fn first_mark(this: &Rc<Cont>, key: &Value) -> Option<Value> {
        let mut current = Some(this);
        while let Some(cont) = current {
            if let ContKind::Marks { marks } = &cont.kind {
                if let Some((_, v)) = marks.iter().find(|(k, _)| super::value::eq(k, key)) {
                    return Some(v.clone());
                }
            }
            current = cont.parent.as_ref();
        }
        None
    }

    /// Nearest handler frame and the continuation it returns to.
    pub fn find_handler(this: &Rc<Cont>) -> Option<(Value, Rc<Cont>)> {
        let mut current = Some(this);
        while let Some(cont) = current {
            if let ContKind::Handler { handler } = &cont.kind {
                return Some((handler.clone(), cont.parent.clone().unwrap_or_else(Cont::done)));
            }
            current = cont.parent.as_ref();
        }
        None
    }
}

impl Drop for Cont {
    fn drop(&mut self) {
        // unlink uniquely owned parents one by one so long chains do not
        // recurse
        let mut next = self.parent.take();
        while let Some(cont) = next {
            match Rc::try_unwrap(cont) {
                Ok(mut cont) => next = cont.parent.take(),
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Value {
        Value::symbol(s)
    }

    #[test]
    fn marks_in_tail_position_replace() {
        let k = Cont::done();
        let k1 = Cont::with_mark(&k, key("a"), Value::fixnum(1));
        let k2 = Cont::with_mark(&k1, key("a"), Value::fixnum(2));
        let k3 = Cont::with_mark(&k2, key("b"), Value::fixnum(3));
        assert_eq!(k3.depth(), 1);
        assert_eq!(Cont::marks(&k3, &key("a")).len(), 1);
        assert!(matches!(Cont::first_mark(&k3, &key("b")), Some(Value::Number(_))));
        // the first frame is untouched
        assert_eq!(Cont::marks(&k1, &key("b")).len(), 0);
    }

    #[test]
    fn dropping_long_chain_does_not_overflow() {
        let mut k = Cont::done();
        for _ in 0..1_000_000 {
            k = Cont::new(ContKind::Void, k);
        }
        assert_eq!(k.depth(), 1_000_000);
        drop(k);
    }

    #[test]
    fn unpack_clones_shared_frames() {
        let parent = Cont::done();
        let k = Cont::new(
            ContKind::CallWithValues {
                consumer: Value::Void,
            },
            parent,
        );
        let extra = k.clone();
        let (kind, parent) = Cont::unpack(k);
        assert!(matches!(kind, ContKind::CallWithValues { .. }));
        assert!(parent.is_done());
        assert!(matches!(extra.kind, ContKind::CallWithValues { .. }));
    }
}
