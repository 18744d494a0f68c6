//! Lowers the expression tree into the node [`Graph`].
//!
//! Compilation works against an explicit continuation: compiling an expression with
//! continuation `k` yields the node for "this expression, then publish into `k`". The tree
//! is therefore lowered bottom-up, and each combinator only has to say how its parts are
//! wired around `k`.

use arcstr::ArcStr;
use std::fmt::{self, Display};

use super::graph::{Def, DefGroup, Graph, Index, Node, Operand};
use super::site::SiteRegistry;
use crate::orc::ast::{Argument, Expression, Literal};
use crate::orc::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum CompileError {
    UnknownSite(ArcStr),
    /// A de Bruijn index that points past every enclosing binder.
    UnboundVariable { index: usize, depth: usize },
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSite(name) => write!(f, "Site `{name}` is not defined."),
            Self::UnboundVariable { index, depth } => write!(
                f,
                "Variable #{index} is not bound; only {depth} binding(s) are in scope."
            ),
        }
    }
}

impl CompileError {
    pub fn to_report(&self) -> miette::Report {
        match self {
            Self::UnknownSite(_) => miette::miette!(help = "register the site before compiling", "{}", self),
            Self::UnboundVariable { .. } => {
                miette::miette!(help = "this is a bug in the front end that produced the program", "{}", self)
            }
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// A compiled program, ready to be started by the engine.
pub struct Compiled {
    pub graph: Graph,
    pub entry: Index<Node>,
    /// The shared `Stop` node; parked tokens that never run (cohort votes) point here.
    pub halt: Index<Node>,
}

pub fn compile(expression: &Expression, sites: &SiteRegistry) -> Result<Compiled> {
    let mut graph = Graph::default();
    let halt = graph.alloc(Node::Stop);
    let ret = graph.alloc(Node::Return);
    let publish = graph.alloc(Node::Publish);
    let resolve = graph.alloc(Node::Resolve);
    let buffer = graph.alloc(Node::Buffer);
    let mut compiler = Compiler {
        graph,
        sites,
        halt,
        ret,
        resolve,
        buffer,
    };
    let entry = compiler.compile(expression, publish, 0)?;
    tracing::debug!(nodes = compiler.graph.node_count(), "compiled program");
    Ok(Compiled {
        graph: compiler.graph,
        entry,
        halt,
    })
}

struct Compiler<'a> {
    graph: Graph,
    sites: &'a SiteRegistry,
    halt: Index<Node>,
    ret: Index<Node>,
    resolve: Index<Node>,
    buffer: Index<Node>,
}

impl Compiler<'_> {
    fn operand(&self, argument: &Argument, depth: usize) -> Result<Operand> {
        match argument {
            Argument::Literal(literal) => Ok(Operand::Constant(match literal {
                Literal::Signal => Value::Signal,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::String(s) => Value::Str(s.clone()),
            })),
            Argument::Variable(index) if *index < depth => Ok(Operand::Variable(*index)),
            Argument::Variable(index) => Err(CompileError::UnboundVariable {
                index: *index,
                depth,
            }),
            Argument::Site(name) => self
                .sites
                .get(name)
                .cloned()
                .map(Operand::Constant)
                .ok_or_else(|| CompileError::UnknownSite(name.clone())),
        }
    }

    /// A continuation is a tail position if nothing but environment pops separate it from
    /// returning to the caller; a call there needs no return frame of its own.
    fn is_tail(&self, mut cont: Index<Node>) -> bool {
        loop {
            match self.graph.get(cont) {
                Node::Return => return true,
                Node::Unwind { next, .. } => cont = *next,
                _ => return false,
            }
        }
    }

    fn compile(
        &mut self,
        expression: &Expression,
        cont: Index<Node>,
        depth: usize,
    ) -> Result<Index<Node>> {
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
            self.compile_inner(expression, cont, depth)
        })
    }

    fn compile_inner(
        &mut self,
        expression: &Expression,
        cont: Index<Node>,
        depth: usize,
    ) -> Result<Index<Node>> {
        Ok(match expression {
            Expression::Stop => self.halt,

            Expression::Value(argument) => {
                let operand = self.operand(argument, depth)?;
                self.graph.alloc(Node::Load {
                    operand,
                    next: cont,
                })
            }

            Expression::Call { target, args, span } => {
                let target = self.operand(target, depth)?;
                let args = args
                    .iter()
                    .map(|arg| self.operand(arg, depth))
                    .collect::<Result<Vec<_>>>()?;
                let tail = self.is_tail(cont);
                self.graph.alloc(Node::Call {
                    target,
                    args,
                    next: cont,
                    tail,
                    span: span.clone(),
                })
            }

            Expression::Field { target, field } => {
                let target = self.operand(target, depth)?;
                self.graph.alloc(Node::Field {
                    target,
                    field: field.clone(),
                    next: cont,
                })
            }

            Expression::Parallel(left, right) => {
                let left = self.compile(left, cont, depth)?;
                let right = self.compile(right, cont, depth)?;
                self.graph.alloc(Node::Fork { left, right })
            }

            Expression::Sequential(left, right) => {
                let pop = self.graph.alloc(Node::Unwind {
                    count: 1,
                    next: cont,
                });
                let right = self.compile(right, pop, depth + 1)?;
                let push = self.graph.alloc(Node::Push { next: right });
                self.compile(left, push, depth)?
            }

            Expression::Pruning { left, right } => {
                let pop = self.graph.alloc(Node::Unwind {
                    count: 1,
                    next: cont,
                });
                let left = self.compile(left, pop, depth + 1)?;
                let right = self.compile(right, self.resolve, depth)?;
                self.graph.alloc(Node::Subgoal { left, right })
            }

            Expression::Otherwise(left, right) => {
                let escape = self.graph.alloc(Node::Escape { next: cont });
                let left = self.compile(left, escape, depth)?;
                let right = self.compile(right, cont, depth)?;
                self.graph.alloc(Node::Otherwise { left, right })
            }

            Expression::Declare { defs, body } => {
                let inner = depth + defs.len();
                let mut compiled = Vec::with_capacity(defs.len());
                for def in defs {
                    let entry = self.compile(&def.body, self.ret, inner + def.arity)?;
                    compiled.push(Def {
                        name: def.name.clone(),
                        arity: def.arity,
                        entry,
                    });
                }
                let group = self.graph.alloc(DefGroup { defs: compiled });
                let pop = self.graph.alloc(Node::Unwind {
                    count: defs.len(),
                    next: cont,
                });
                let next = self.compile(body, pop, inner)?;
                self.graph.alloc(Node::Declare { defs: group, next })
            }

            Expression::Atomic(body) => {
                let body = self.compile(body, self.buffer, depth)?;
                self.graph.alloc(Node::Atomic { body, next: cont })
            }
        })
    }
}
