//! Transactions: `atomic` sections and the two-phase commit that ends them.
//!
//! The body of a transaction runs in a group and a region of its own. Its publications are
//! buffered instead of being released. When the body region goes quiescent the transaction
//! asks every enlisted cohort whether it is ready; each pending answer is represented by a
//! vote token in a separate region, so the ordinary quiescence machinery tells the engine
//! when every cohort has answered. If none of them aborted, each cohort is confirmed, the
//! cohorts are handed to the parent transaction, and the buffered publications are released
//! into the continuation of the `atomic` node. An abort at any point kills the body, rolls
//! the cohorts back, and releases nothing.

use indexmap::IndexMap;
use std::sync::Arc;

use super::arena::Id;
use super::cohort::{Cohort, Vote};
use super::engine::Engine;
use super::error::CoreError;
use super::graph::{Index, Node};
use super::group::{Group, GroupId, GroupKind};
use super::region::RegionKind;
use super::token::{Continuation, Token, TokenId, TokenState};
use crate::orc::value::Value;

pub type TxnId = Id<Transaction>;

/// A transaction as seen by cohorts: its own id and those of all enclosing transactions,
/// innermost first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxnScope {
    lineage: Arc<[TxnId]>,
}

impl TxnScope {
    pub(crate) fn root(id: TxnId) -> Self {
        Self {
            lineage: Arc::from([id]),
        }
    }

    pub(crate) fn child(&self, id: TxnId) -> Self {
        let lineage: Vec<TxnId> = std::iter::once(id)
            .chain(self.lineage.iter().copied())
            .collect();
        Self {
            lineage: lineage.into(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.lineage[0]
    }

    pub fn parent(&self) -> Option<TxnId> {
        self.lineage.get(1).copied()
    }

    /// This transaction followed by its ancestors, innermost first.
    pub fn lineage(&self) -> &[TxnId] {
        &self.lineage
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// The body is still running; publications are buffered.
    Running,
    /// Votes are out.
    Readying,
    Done,
    /// Terminal; later aborts and commit steps do nothing.
    Aborted,
}

pub struct Transaction {
    pub scope: TxnScope,
    pub parent: Option<TxnId>,
    /// Keyed by address so a cohort enlisted twice is asked once.
    pub cohorts: IndexMap<usize, Arc<dyn Cohort>>,
    pub publications: Vec<Value>,
    pub state: TxnState,
    pub group: GroupId,
    /// Where the buffered publications go after a commit.
    pub continuation: Continuation,
}

fn cohort_key(cohort: &Arc<dyn Cohort>) -> usize {
    Arc::as_ptr(cohort) as *const () as usize
}

impl Engine {
    /// Starts a transaction for `token`, which moves into it and continues at `body`.
    pub(crate) fn enter_atomic(
        &mut self,
        token: TokenId,
        body: Index<Node>,
        next: Index<Node>,
    ) -> Result<(), CoreError> {
        let token_ref = self.tokens.get(token).ok_or(CoreError::Missing("token"))?;
        let continuation = Continuation::of(token_ref, next);
        let outer = token_ref.txn;
        let outer_scope = outer
            .and_then(|outer| self.transactions.get(outer))
            .map(|outer| outer.scope.clone());

        let parent_group = continuation.group;
        let groups = &mut self.groups;
        let txn = self.transactions.insert_with(|id| {
            let group = groups.insert(Group::new(
                Some(parent_group),
                GroupKind::Transaction(id),
            ));
            Transaction {
                scope: match &outer_scope {
                    Some(scope) => scope.child(id),
                    None => TxnScope::root(id),
                },
                parent: outer,
                cohorts: IndexMap::new(),
                publications: vec![],
                state: TxnState::Running,
                group,
                continuation,
            }
        });
        let group = self
            .transactions
            .get(txn)
            .map(|t| t.group)
            .ok_or(CoreError::Missing("transaction"))?;
        if let Some(parent) = self.groups.get_mut(parent_group) {
            parent.children.insert(group);
        }
        tracing::debug!(?txn, ?outer, "transaction started");

        let enclosing = self.token_mut(token)?.region;
        let region = self.new_region(enclosing, RegionKind::Transaction(txn))?;
        if let Some(old) = self.groups.get_mut(parent_group) {
            old.members.shift_remove(&token);
        }
        if let Some(new) = self.groups.get_mut(group) {
            new.members.insert(token);
        }
        let token_ref = self.token_mut(token)?;
        token_ref.group = group;
        token_ref.txn = Some(txn);
        token_ref.node = body;
        self.move_token(token, region)?;
        self.ready.push_back(token);
        Ok(())
    }

    /// A publication reached the end of a transaction body: hold it until the commit.
    pub(crate) fn buffer_publication(&mut self, token: TokenId) -> Result<(), CoreError> {
        let token_ref = self.tokens.get(token).ok_or(CoreError::Missing("token"))?;
        let txn = token_ref.txn.ok_or(CoreError::ScopeMismatch("transaction"))?;
        let value = token_ref.result.clone();
        if let Some(txn) = self.transactions.get_mut(txn) {
            if txn.state == TxnState::Running {
                txn.publications.push(value);
            }
        }
        self.kill_token(token)
    }

    /// Records cohorts with a transaction and all of its ancestors.
    pub(crate) fn enlist(&mut self, txn: TxnId, cohorts: Vec<Arc<dyn Cohort>>) {
        if cohorts.is_empty() {
            return;
        }
        let Some(lineage) = self.transactions.get(txn).map(|t| t.scope.clone()) else {
            return;
        };
        for id in lineage.lineage() {
            if let Some(txn) = self.transactions.get_mut(*id) {
                for cohort in &cohorts {
                    txn.cohorts
                        .entry(cohort_key(cohort))
                        .or_insert_with(|| Arc::clone(cohort));
                }
            }
        }
    }

    /// The body is done. Asks every cohort for its vote.
    pub(crate) fn prepare_commit(&mut self, txn: TxnId) -> Result<(), CoreError> {
        let Some(record) = self.transactions.get_mut(txn) else {
            return Ok(());
        };
        if record.state != TxnState::Running {
            return self.retire(txn);
        }
        record.state = TxnState::Readying;
        let scope = record.scope.clone();
        let group = record.group;
        let cohorts: Vec<_> = record.cohorts.values().cloned().collect();
        let continuation = record.continuation.clone();
        tracing::debug!(?txn, cohorts = cohorts.len(), "preparing commit");

        let region = self.new_region(continuation.region, RegionKind::Ready(txn))?;
        for cohort in cohorts {
            let vote = Token {
                node: self.program.halt,
                group,
                region,
                txn: Some(txn),
                state: TokenState::Voting,
                ..continuation.resume(Value::Signal)
            };
            let Some(vote) = self.spawn(vote) else {
                continue;
            };
            cohort.ready(&scope, Vote::new(vote, self.returns.clone()));
        }
        self.settle_region(region)
    }

    /// Every vote is in. Confirms the cohorts and releases the buffered publications, unless
    /// someone voted to abort.
    pub(crate) fn verify_commit(&mut self, txn: TxnId) -> Result<(), CoreError> {
        let Some(record) = self.transactions.get_mut(txn) else {
            return Ok(());
        };
        if record.state != TxnState::Readying {
            return self.retire(txn);
        }
        let scope = record.scope.clone();
        let cohorts: Vec<_> = record.cohorts.values().cloned().collect();
        for cohort in &cohorts {
            cohort.confirm(&scope);
        }
        record.state = TxnState::Done;
        let publications = std::mem::take(&mut record.publications);
        let continuation = record.continuation.clone();
        let parent = record.parent;
        self.stats.commits += 1;
        tracing::debug!(?txn, publications = publications.len(), "committed");

        if let Some(parent) = parent.and_then(|parent| self.transactions.get_mut(parent)) {
            for cohort in cohorts {
                parent
                    .cohorts
                    .entry(cohort_key(&cohort))
                    .or_insert(cohort);
            }
        }
        self.retire(txn)?;
        for value in publications {
            if let Some(token) = self.spawn(continuation.resume(value)) {
                self.ready.push_back(token);
            }
        }
        Ok(())
    }

    /// Aborts a transaction: kills its body and its votes, then rolls every cohort back.
    /// Aborting twice does nothing.
    pub(crate) fn abort(&mut self, txn: TxnId) -> Result<(), CoreError> {
        let Some(record) = self.transactions.get_mut(txn) else {
            return Ok(());
        };
        if matches!(record.state, TxnState::Done | TxnState::Aborted) {
            return Ok(());
        }
        record.state = TxnState::Aborted;
        record.publications.clear();
        let scope = record.scope.clone();
        let group = record.group;
        let cohorts: Vec<_> = record.cohorts.values().cloned().collect();
        self.stats.aborts += 1;
        tracing::debug!(?txn, "aborting");

        self.kill_group(group)?;
        for cohort in &cohorts {
            cohort.rollback(&scope);
        }
        Ok(())
    }

    /// Removes a finished transaction and its group.
    fn retire(&mut self, txn: TxnId) -> Result<(), CoreError> {
        let Some(record) = self.transactions.remove(txn) else {
            return Ok(());
        };
        self.kill_group(record.group)
    }
}
