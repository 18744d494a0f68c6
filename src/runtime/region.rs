//! Regions: liveness tracking for the combinators that react to a computation ending.
//!
//! A region counts its live tokens plus its live child regions. When the count drops to
//! zero the region is quiescent: its record is removed, its kind decides what happens next,
//! and only then is it detached from its parent, which may in turn become quiescent.
//! Because the record goes first, a region can settle only once.

use indexmap::IndexSet;

use super::arena::Id;
use super::engine::Engine;
use super::error::CoreError;
use super::group::GroupId;
use super::token::{Continuation, TokenId};
use super::transaction::TxnId;
use crate::orc::value::Value;

pub type RegionId = Id<Region>;

pub struct Region {
    pub parent: Option<RegionId>,
    pub children: IndexSet<RegionId>,
    pub tokens: IndexSet<TokenId>,
    /// Live tokens plus live child regions.
    pub live: usize,
    /// A closed region accepts no new tokens.
    pub closed: bool,
    pub kind: RegionKind,
}

pub enum RegionKind {
    /// Quiescence of the root region ends the run.
    Root,
    /// The right-hand side of a pruning; on quiescence an unbound cell dies.
    Pruning(GroupId),
    /// The left-hand side of `;`; on quiescence without a publication the fallback runs.
    Otherwise {
        published: bool,
        fallback: Continuation,
    },
    /// The body of a transaction; on quiescence the transaction prepares to commit.
    Transaction(TxnId),
    /// The cohort votes of a transaction; on quiescence the commit is verified.
    Ready(TxnId),
}

impl Region {
    pub fn new(parent: Option<RegionId>, kind: RegionKind) -> Self {
        Self {
            parent,
            children: IndexSet::new(),
            tokens: IndexSet::new(),
            live: 0,
            closed: false,
            kind,
        }
    }
}

impl Engine {
    pub(crate) fn new_region(
        &mut self,
        parent: RegionId,
        kind: RegionKind,
    ) -> Result<RegionId, CoreError> {
        if !self.regions.contains(parent) {
            return Err(CoreError::Missing("parent region"));
        }
        let id = self.regions.insert(Region::new(Some(parent), kind));
        if let Some(parent) = self.regions.get_mut(parent) {
            parent.children.insert(id);
            parent.live += 1;
        }
        Ok(id)
    }

    pub(crate) fn region_remove_token(
        &mut self,
        region: RegionId,
        token: TokenId,
    ) -> Result<(), CoreError> {
        let Some(record) = self.regions.get_mut(region) else {
            return Err(CoreError::Missing("region"));
        };
        if !record.tokens.shift_remove(&token) {
            return Err(CoreError::ScopeMismatch("region"));
        }
        record.live -= 1;
        if record.live == 0 {
            self.quiescent(region)?;
        }
        Ok(())
    }

    /// Moves a live token into `to`. The new region is joined before the old one is left,
    /// so moving out of a region never makes its destination quiescent.
    pub(crate) fn move_token(&mut self, token: TokenId, to: RegionId) -> Result<(), CoreError> {
        let from = self.token_mut(token)?.region;
        let Some(target) = self.regions.get_mut(to) else {
            return Err(CoreError::Missing("region"));
        };
        target.tokens.insert(token);
        target.live += 1;
        self.token_mut(token)?.region = to;
        self.region_remove_token(from, token)
    }

    /// Settles a region that may have been created empty.
    pub(crate) fn settle_region(&mut self, region: RegionId) -> Result<(), CoreError> {
        match self.regions.get(region) {
            Some(record) if record.live == 0 => self.quiescent(region),
            _ => Ok(()),
        }
    }

    /// Kills every token in `region` and below, and refuses new ones from now on.
    pub(crate) fn close_region(&mut self, region: RegionId) -> Result<(), CoreError> {
        let mut doomed = vec![];
        let mut pending = vec![region];
        while let Some(id) = pending.pop() {
            let Some(record) = self.regions.get_mut(id) else {
                continue;
            };
            record.closed = true;
            doomed.extend(record.tokens.iter().copied());
            pending.extend(record.children.iter().copied());
        }
        for token in doomed {
            self.kill_token(token)?;
        }
        Ok(())
    }

    fn quiescent(&mut self, region: RegionId) -> Result<(), CoreError> {
        let mut current = region;
        loop {
            let Some(record) = self.regions.remove(current) else {
                return Ok(());
            };
            tracing::trace!(region = ?current, "quiescent");
            match record.kind {
                RegionKind::Root => {
                    self.halted = true;
                }
                RegionKind::Pruning(cell) => {
                    // a bound cell is removed when it is bound
                    self.kill_group(cell)?;
                }
                RegionKind::Otherwise {
                    published,
                    fallback,
                } => {
                    if !published {
                        if let Some(token) = self.spawn(fallback.resume(Value::Signal)) {
                            self.ready.push_back(token);
                        }
                    }
                }
                RegionKind::Transaction(txn) => self.prepare_commit(txn)?,
                RegionKind::Ready(txn) => self.verify_commit(txn)?,
            }

            let Some(parent) = record.parent else {
                return Ok(());
            };
            let Some(parent_record) = self.regions.get_mut(parent) else {
                return Ok(());
            };
            parent_record.children.shift_remove(&current);
            parent_record.live -= 1;
            if parent_record.live > 0 {
                return Ok(());
            }
            current = parent;
        }
    }
}
