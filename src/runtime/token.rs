//! Tokens: the individual threads of control of a running program.

use arcstr::ArcStr;

use super::arena::Id;
use super::env::{Env, Stack};
use super::graph::{Index, Node};
use super::group::GroupId;
use super::region::RegionId;
use super::transaction::TxnId;
use crate::location::Span;
use crate::orc::value::Value;

pub type TokenId = Id<Token>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// In the ready queue, or about to be put there.
    Runnable,
    /// Waiting on an unbound pruning cell or on a virtual timer.
    Blocked,
    /// Waiting for a threaded call to the named site to come back.
    Calling(ArcStr),
    /// Standing in for a cohort's ready vote.
    Voting,
}

#[derive(Clone)]
pub struct Token {
    /// The node this token executes next. A blocked token re-executes it once woken.
    pub node: Index<Node>,
    pub env: Env,
    pub stack: Stack,
    /// The last value published into this token.
    pub result: Value,
    pub group: GroupId,
    pub region: RegionId,
    pub txn: Option<TxnId>,
    pub span: Span,
    pub state: TokenState,
}

impl Token {
    /// A runnable copy of this token at `node`, sharing everything else.
    pub fn fork(&self, node: Index<Node>) -> Token {
        Token {
            node,
            state: TokenState::Runnable,
            ..self.clone()
        }
    }
}

/// A snapshot of a token that lets the engine start a fresh one later, when a region it
/// belongs to settles.
#[derive(Clone)]
pub struct Continuation {
    pub node: Index<Node>,
    pub env: Env,
    pub stack: Stack,
    pub group: GroupId,
    pub region: RegionId,
    pub txn: Option<TxnId>,
    pub span: Span,
}

impl Continuation {
    pub fn of(token: &Token, node: Index<Node>) -> Self {
        Self {
            node,
            env: token.env.clone(),
            stack: token.stack.clone(),
            group: token.group,
            region: token.region,
            txn: token.txn,
            span: token.span.clone(),
        }
    }

    pub fn resume(&self, result: Value) -> Token {
        Token {
            node: self.node,
            env: self.env.clone(),
            stack: self.stack.clone(),
            result,
            group: self.group,
            region: self.region,
            txn: self.txn,
            span: self.span.clone(),
            state: TokenState::Runnable,
        }
    }
}
