//! The compiled program: a graph of steps.
//!
//! Every node knows how to process one token and which node the token visits next. The
//! graph is built once by the [compiler](super::compiler) and never changes while it runs;
//! the per-run state lives in tokens and in the engine's scope records.

use arcstr::ArcStr;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};

use crate::location::Span;
use crate::orc::value::Value;

#[derive(Default)]
/// The `Graph` is a store for nodes and definition groups and hands out indices into it.
/// Allocation is done using [`Graph::alloc`], and values can be accessed later with
/// [`Graph::get`].
pub struct Graph {
    nodes: Vec<Node>,
    defs: Vec<DefGroup>,
}

impl Graph {
    pub fn get<T: Indexable>(&self, index: Index<T>) -> &T {
        T::get(self, index)
    }

    pub fn alloc<T: Indexable>(&mut self, data: T) -> Index<T> {
        T::alloc(self, data)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

pub struct Index<T: Indexable>(usize, std::marker::PhantomData<fn() -> T>);

impl<T: Indexable> Index<T> {
    fn new(offset: usize) -> Self {
        Self(offset, std::marker::PhantomData)
    }
}

/// The `Indexable` trait is implemented by everything a [`Graph`] stores.
pub trait Indexable: Sized {
    fn get(store: &Graph, index: Index<Self>) -> &Self;
    fn alloc(store: &mut Graph, data: Self) -> Index<Self>;
}

impl Indexable for Node {
    fn get(store: &Graph, index: Index<Self>) -> &Self {
        &store.nodes[index.0]
    }
    fn alloc(store: &mut Graph, data: Self) -> Index<Self> {
        store.nodes.push(data);
        Index::new(store.nodes.len() - 1)
    }
}

impl Indexable for DefGroup {
    fn get(store: &Graph, index: Index<Self>) -> &Self {
        &store.defs[index.0]
    }
    fn alloc(store: &mut Graph, data: Self) -> Index<Self> {
        store.defs.push(data);
        Index::new(store.defs.len() - 1)
    }
}

impl<T: Indexable> Clone for Index<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Indexable> Copy for Index<T> {}
impl<T: Indexable> PartialEq for Index<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T: Indexable> Eq for Index<T> {}
impl<T: Indexable> Hash for Index<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}
impl<T: Indexable> Debug for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A call target or argument once sites have been resolved.
#[derive(Clone, Debug)]
pub enum Operand {
    Constant(Value),
    Variable(usize),
}

#[derive(Clone, Debug)]
pub enum Node {
    /// The token halts.
    Stop,
    /// The token's result becomes the operand; variables bound to futures are forced.
    Load { operand: Operand, next: Index<Node> },
    /// Read a field of a record.
    Field {
        target: Operand,
        field: ArcStr,
        next: Index<Node>,
    },
    /// Push the token's result onto its environment.
    Push { next: Index<Node> },
    /// Pop `count` bindings.
    Unwind { count: usize, next: Index<Node> },
    /// Parallel composition: the token continues left and a copy of it starts right.
    Fork { left: Index<Node>, right: Index<Node> },
    /// Pruning: `right` runs in a fresh cell group and region; the token continues at
    /// `left` with the cell bound at index 0.
    Subgoal { left: Index<Node>, right: Index<Node> },
    /// End of a pruning's right side: the first token to arrive binds the cell.
    Resolve,
    /// Otherwise: `left` runs in a fresh region; `right` starts only if that region goes
    /// quiet without ever publishing.
    Otherwise { left: Index<Node>, right: Index<Node> },
    /// A publication leaves the region opened by the enclosing `Otherwise`.
    Escape { next: Index<Node> },
    /// Enter an atomic section; committed publications continue at `next`.
    Atomic { body: Index<Node>, next: Index<Node> },
    /// A publication of an atomic section is buffered until commit.
    Buffer,
    /// Bind a group of mutually recursive closures.
    Declare { defs: Index<DefGroup>, next: Index<Node> },
    Call {
        target: Operand,
        args: Vec<Operand>,
        next: Index<Node>,
        tail: bool,
        span: Span,
    },
    /// Publish from a closure body to the caller's return frame.
    Return,
    /// Publish past the top of the graph.
    Publish,
}

#[derive(Clone, Debug)]
pub struct Def {
    pub name: ArcStr,
    pub arity: usize,
    pub entry: Index<Node>,
}

#[derive(Clone, Debug)]
pub struct DefGroup {
    pub defs: Vec<Def>,
}
