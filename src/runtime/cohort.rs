//! The cohort side of the commit protocol.
//!
//! A cohort is any piece of state that takes part in transactions. When a transaction ends,
//! each of its cohorts receives a [`Vote`] and answers it, now or later, from any thread.
//! A cohort that voted ready is then either confirmed or rolled back, synchronously, on the
//! scheduling thread.
//!
//! [`Versioned`] implements the usual cohort bookkeeping for a single value: every
//! transaction works on its own copy, made on first touch, and a commit succeeds only if
//! the copy it was made from has not moved on in the meantime.

use std::collections::HashMap;

use super::engine::Returns;
use super::site::Outcome;
use super::token::TokenId;
use super::transaction::{TxnId, TxnScope};

pub trait Cohort: Send + Sync {
    /// Asked once per commit. Answer through `vote`; dropping it unanswered votes to abort.
    fn ready(&self, txn: &TxnScope, vote: Vote);
    /// Make the transaction's effects visible to its parent, or globally for a top-level one.
    fn confirm(&self, txn: &TxnScope);
    /// Forget everything the transaction did.
    fn rollback(&self, txn: &TxnScope);
}

/// A cohort's pending answer to "ready to commit?".
pub struct Vote {
    token: TokenId,
    returns: Option<Returns>,
}

impl Vote {
    pub(crate) fn new(token: TokenId, returns: Returns) -> Self {
        Self {
            token,
            returns: Some(returns),
        }
    }

    pub fn ready(mut self) {
        self.answer(Outcome::Halt);
    }

    pub fn abort(mut self) {
        self.answer(Outcome::Abort);
    }

    fn answer(&mut self, outcome: Outcome) {
        if let Some(returns) = self.returns.take() {
            returns.send(self.token, outcome);
        }
    }
}

impl Drop for Vote {
    fn drop(&mut self) {
        self.answer(Outcome::Abort);
    }
}

#[derive(Clone, Debug)]
struct Layer<T> {
    value: T,
    /// Bumped on every write and on every child commit merged into this layer.
    version: u64,
    /// The version of the parent layer this copy was taken from.
    base: u64,
    dirty: bool,
    /// A child that voted ready and has not been confirmed or rolled back yet.
    pending: Option<TxnId>,
}

impl<T: Clone> Layer<T> {
    fn new(value: T, base: u64) -> Self {
        Self {
            value,
            version: 0,
            base,
            dirty: false,
            pending: None,
        }
    }
}

/// A value with one committed layer and one private layer per transaction that touched it.
#[derive(Debug)]
pub struct Versioned<T> {
    committed: Layer<T>,
    overlays: HashMap<TxnId, Layer<T>>,
}

impl<T: Clone> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            committed: Layer::new(value, 0),
            overlays: HashMap::new(),
        }
    }

    /// The globally visible value.
    pub fn committed(&self) -> &T {
        &self.committed.value
    }

    fn layer(&self, txn: Option<TxnId>) -> Option<&Layer<T>> {
        match txn {
            None => Some(&self.committed),
            Some(txn) => self.overlays.get(&txn),
        }
    }

    fn layer_mut(&mut self, txn: Option<TxnId>) -> Option<&mut Layer<T>> {
        match txn {
            None => Some(&mut self.committed),
            Some(txn) => self.overlays.get_mut(&txn),
        }
    }

    /// Makes sure every transaction in `scope` has a layer, outermost first.
    fn touch(&mut self, scope: &TxnScope) {
        let lineage = scope.lineage();
        for (depth, id) in lineage.iter().enumerate().rev() {
            if self.overlays.contains_key(id) {
                continue;
            }
            let parent = lineage.get(depth + 1).copied();
            let Some(source) = self.layer(parent) else {
                continue;
            };
            let layer = Layer::new(source.value.clone(), source.version);
            self.overlays.insert(*id, layer);
        }
    }

    /// The value as seen from `scope`, or the committed value outside a transaction.
    pub fn read(&mut self, scope: Option<&TxnScope>) -> &T {
        match scope {
            None => &self.committed.value,
            Some(scope) => {
                self.touch(scope);
                match self.overlays.get(&scope.id()) {
                    Some(layer) => &layer.value,
                    None => &self.committed.value,
                }
            }
        }
    }

    /// Write access as seen from `scope`. `None` while a child transaction of that scope has
    /// voted ready and waits to be confirmed; writing then would be lost or overwritten.
    pub fn write(&mut self, scope: Option<&TxnScope>) -> Option<&mut T> {
        let txn = scope.map(|scope| {
            self.touch(scope);
            scope.id()
        });
        let layer = self.layer_mut(txn)?;
        if layer.pending.is_some() {
            return None;
        }
        layer.version += 1;
        layer.dirty = true;
        Some(&mut layer.value)
    }

    /// Whether `scope` may commit: nothing else is committing into its parent, and the parent
    /// has not changed since this transaction first looked. Marks the parent as pending.
    pub fn ready(&mut self, scope: &TxnScope) -> bool {
        let id = scope.id();
        let Some(base) = self.overlays.get(&id).map(|layer| layer.base) else {
            return true;
        };
        let Some(parent) = self.layer_mut(scope.parent()) else {
            return false;
        };
        if parent.pending.is_some_and(|pending| pending != id) || parent.version != base {
            return false;
        }
        parent.pending = Some(id);
        true
    }

    pub fn confirm(&mut self, scope: &TxnScope) {
        let id = scope.id();
        let Some(layer) = self.overlays.remove(&id) else {
            return;
        };
        let Some(parent) = self.layer_mut(scope.parent()) else {
            return;
        };
        if parent.pending == Some(id) {
            parent.pending = None;
        }
        if layer.dirty {
            parent.value = layer.value;
            parent.version += 1;
            parent.dirty = true;
        }
    }

    pub fn rollback(&mut self, scope: &TxnScope) {
        let id = scope.id();
        self.overlays.remove(&id);
        if let Some(parent) = self.layer_mut(scope.parent()) {
            if parent.pending == Some(id) {
                parent.pending = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::arena::Id;

    fn scopes(n: u32) -> Vec<TxnScope> {
        (0..n).map(|i| TxnScope::root(Id::from_raw(i, 0))).collect()
    }

    #[test]
    fn transactions_see_their_own_writes_only() {
        let txns = scopes(2);
        let mut cell = Versioned::new(0);
        *cell.write(Some(&txns[0])).unwrap() = 5;
        assert_eq!(*cell.read(Some(&txns[0])), 5);
        assert_eq!(*cell.read(Some(&txns[1])), 0);
        assert_eq!(*cell.committed(), 0);
    }

    #[test]
    fn first_ready_wins_and_blocks_the_other() {
        let txns = scopes(2);
        let mut cell = Versioned::new(0);
        *cell.write(Some(&txns[0])).unwrap() = 1;
        *cell.write(Some(&txns[1])).unwrap() = 2;
        assert!(cell.ready(&txns[0]));
        assert!(!cell.ready(&txns[1]));
        cell.confirm(&txns[0]);
        cell.rollback(&txns[1]);
        assert_eq!(*cell.committed(), 1);
    }

    #[test]
    fn commits_after_the_base_moved_are_refused() {
        let txns = scopes(2);
        let mut cell = Versioned::new(0);
        *cell.write(Some(&txns[0])).unwrap() += 1;
        assert_eq!(*cell.read(Some(&txns[1])), 0);
        assert!(cell.ready(&txns[0]));
        cell.confirm(&txns[0]);
        assert!(!cell.ready(&txns[1]));
    }

    #[test]
    fn reads_alone_still_validate_against_the_base() {
        let txns = scopes(1);
        let mut cell = Versioned::new(vec![1]);
        assert_eq!(cell.read(Some(&txns[0])), &vec![1]);
        cell.write(None).unwrap().push(2);
        assert!(!cell.ready(&txns[0]));
    }

    #[test]
    fn plain_writes_decline_while_a_commit_is_pending() {
        let txns = scopes(1);
        let mut cell = Versioned::new(0);
        *cell.write(Some(&txns[0])).unwrap() = 3;
        assert!(cell.ready(&txns[0]));
        assert!(cell.write(None).is_none());
        cell.confirm(&txns[0]);
        assert_eq!(cell.write(None).copied(), Some(3));
    }

    #[test]
    fn rollback_discards_the_overlay() {
        let txns = scopes(1);
        let mut cell = Versioned::new(0);
        *cell.write(Some(&txns[0])).unwrap() = 9;
        assert!(cell.ready(&txns[0]));
        cell.rollback(&txns[0]);
        assert_eq!(*cell.committed(), 0);
        assert_eq!(cell.write(None).copied(), Some(0));
    }

    #[test]
    fn nested_commits_land_in_the_parent_first() {
        let txns = scopes(2);
        let outer = txns[0].clone();
        let inner = outer.child(txns[1].id());
        let mut cell = Versioned::new(0);
        *cell.write(Some(&inner)).unwrap() = 7;
        assert!(cell.ready(&inner));
        cell.confirm(&inner);
        assert_eq!(*cell.read(Some(&outer)), 7);
        assert_eq!(*cell.committed(), 0);
        assert!(cell.ready(&outer));
        cell.confirm(&outer);
        assert_eq!(*cell.committed(), 7);
    }
}
