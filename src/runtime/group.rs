//! Groups: the kill scopes of a run.
//!
//! Every token belongs to exactly one group and groups form a tree. Killing a group kills
//! its members and, recursively, every group below it. Besides the root, there are two
//! kinds: the cell a pruning combinator binds (killed as soon as it has a value) and the
//! group running the body of a transaction (killed when the transaction aborts).

use indexmap::IndexSet;
use std::sync::{Arc, OnceLock};

use super::arena::Id;
use super::engine::Engine;
use super::error::CoreError;
use super::region::RegionId;
use super::token::{TokenId, TokenState};
use super::transaction::TxnId;
use crate::orc::value::Value;

pub type GroupId = Id<Group>;

pub struct Group {
    pub parent: Option<GroupId>,
    pub children: IndexSet<GroupId>,
    pub members: IndexSet<TokenId>,
    /// Once set, no token may join the group again.
    pub killed: bool,
    pub kind: GroupKind,
}

pub enum GroupKind {
    Root,
    Cell(Cell),
    Transaction(TxnId),
}

/// The single-assignment slot of a pruning combinator, with the tokens waiting for it.
pub struct Cell {
    pub slot: Arc<OnceLock<Value>>,
    pub waiters: Vec<TokenId>,
    /// The region the cell's right-hand side runs in.
    pub region: Option<RegionId>,
}

impl Group {
    pub fn new(parent: Option<GroupId>, kind: GroupKind) -> Self {
        Self {
            parent,
            children: IndexSet::new(),
            members: IndexSet::new(),
            killed: false,
            kind,
        }
    }
}

/// What reading an operand gave a token.
pub(crate) enum Forced {
    Ready(Value),
    /// The token was parked on an unbound cell.
    Blocked,
    /// The cell the token needed died without a value; the token is gone.
    Dead,
}

impl Engine {
    pub(crate) fn new_group(&mut self, parent: GroupId, kind: GroupKind) -> GroupId {
        let id = self.groups.insert(Group::new(Some(parent), kind));
        if let Some(parent) = self.groups.get_mut(parent) {
            parent.children.insert(id);
        }
        id
    }

    /// Parks `token` on the cell `group` until it is bound. If the cell is already gone
    /// without a value, the token is killed instead.
    pub(crate) fn wait_for(&mut self, group: GroupId, token: TokenId) -> Result<Forced, CoreError> {
        match self.groups.get_mut(group) {
            Some(Group {
                killed: false,
                kind: GroupKind::Cell(cell),
                ..
            }) => {
                if let Some(value) = cell.slot.get() {
                    return Ok(Forced::Ready(value.clone()));
                }
                cell.waiters.push(token);
                self.token_mut(token)?.state = TokenState::Blocked;
                Ok(Forced::Blocked)
            }
            _ => {
                self.kill_token(token)?;
                Ok(Forced::Dead)
            }
        }
    }

    /// Binds a pruning cell: stores the value, kills everything still computing it and
    /// wakes every token that was waiting.
    pub(crate) fn set_value(&mut self, group: GroupId, value: Value) -> Result<(), CoreError> {
        let (waiters, region) = match self.groups.get_mut(group) {
            Some(Group {
                kind: GroupKind::Cell(cell),
                ..
            }) => {
                cell.slot.set(value).map_err(|_| CoreError::DoubleBind)?;
                (std::mem::take(&mut cell.waiters), cell.region)
            }
            Some(_) => return Err(CoreError::NotACell),
            None => return Err(CoreError::Missing("cell")),
        };
        self.stats.bindings += 1;
        tracing::trace!(?group, waiters = waiters.len(), "cell bound");

        self.kill_group(group)?;
        if let Some(region) = region {
            self.close_region(region)?;
        }
        for waiter in waiters {
            if let Some(token) = self.tokens.get_mut(waiter) {
                token.state = TokenState::Runnable;
                self.ready.push_back(waiter);
            }
        }
        Ok(())
    }

    /// Kills `group` and everything below it. A killed cell without a value takes its
    /// waiters along; a killed transaction group aborts its transaction. Killing a group that
    /// is already gone does nothing.
    pub(crate) fn kill_group(&mut self, group: GroupId) -> Result<(), CoreError> {
        let mut pending = vec![group];
        while let Some(id) = pending.pop() {
            let Some(group) = self.groups.get_mut(id) else {
                continue;
            };
            if group.killed {
                continue;
            }
            group.killed = true;
            let members = std::mem::take(&mut group.members);
            pending.extend(group.children.iter().copied());
            let orphans = match &mut group.kind {
                GroupKind::Cell(cell) if cell.slot.get().is_none() => {
                    std::mem::take(&mut cell.waiters)
                }
                _ => vec![],
            };
            let txn = match group.kind {
                GroupKind::Transaction(txn) => Some(txn),
                _ => None,
            };

            if let Some(txn) = txn {
                self.abort(txn)?;
            }
            for token in members.into_iter().chain(orphans) {
                self.kill_token(token)?;
            }
            self.remove_group(id);
        }
        Ok(())
    }

    fn remove_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.remove(id) else {
            return;
        };
        if let Some(parent) = group.parent.and_then(|parent| self.groups.get_mut(parent)) {
            parent.children.shift_remove(&id);
        }
        for child in group.children {
            if let Some(child) = self.groups.get_mut(child) {
                child.parent = None;
            }
        }
    }
}
