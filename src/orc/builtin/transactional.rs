//! Transactional state: a bounded buffer and a reference cell, plus the site that aborts the
//! enclosing transaction.
//!
//! Both containers are cohorts backed by [`Versioned`]. Their operations are exposed as a
//! record of transactional sites; each call enlists the container with the caller's
//! transaction before touching it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::orc::value::Value;
use crate::runtime::cohort::{Cohort, Versioned, Vote};
use crate::runtime::site::{Site, SiteContext, SiteError, SiteRegistry, TransactionalSite};
use crate::runtime::transaction::TxnScope;

type Operation<S> = fn(&S, Option<&TxnScope>, &[Value]) -> Result<Option<Value>, SiteError>;

/// One operation of a shared cohort, callable as a site.
struct Method<S> {
    state: Arc<S>,
    run: Operation<S>,
}

impl<S: Cohort + 'static> TransactionalSite for Method<S> {
    fn call(
        &self,
        cx: &mut SiteContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, SiteError> {
        cx.enlist(self.state.clone());
        (self.run)(&self.state, cx.transaction(), args)
    }
}

/// A shared value with transactional overlays.
struct Shared<T>(Mutex<Versioned<T>>);

impl<T: Clone> Shared<T> {
    fn new(value: T) -> Self {
        Self(Mutex::new(Versioned::new(value)))
    }

    fn lock(&self) -> MutexGuard<'_, Versioned<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send> Cohort for Shared<T> {
    fn ready(&self, txn: &TxnScope, vote: Vote) {
        if self.lock().ready(txn) {
            vote.ready();
        } else {
            tracing::debug!(txn = ?txn.id(), "another commit is pending or the state moved on");
            vote.abort();
        }
    }

    fn confirm(&self, txn: &TxnScope) {
        self.lock().confirm(txn);
    }

    fn rollback(&self, txn: &TxnScope) {
        self.lock().rollback(txn);
    }
}

struct Buffer {
    capacity: usize,
    items: Shared<VecDeque<Value>>,
}

impl Cohort for Buffer {
    fn ready(&self, txn: &TxnScope, vote: Vote) {
        self.items.ready(txn, vote);
    }

    fn confirm(&self, txn: &TxnScope) {
        self.items.confirm(txn);
    }

    fn rollback(&self, txn: &TxnScope) {
        self.items.rollback(txn);
    }
}

fn put(buffer: &Buffer, txn: Option<&TxnScope>, args: &[Value]) -> Result<Option<Value>, SiteError> {
    let [value] = args else {
        return Err(SiteError::arity(1, args.len()));
    };
    let mut items = buffer.items.lock();
    if items.read(txn).len() >= buffer.capacity {
        return Ok(None);
    }
    Ok(items.write(txn).map(|items| {
        items.push_back(value.clone());
        Value::Signal
    }))
}

fn get(buffer: &Buffer, txn: Option<&TxnScope>, args: &[Value]) -> Result<Option<Value>, SiteError> {
    if !args.is_empty() {
        return Err(SiteError::arity(0, args.len()));
    }
    let mut items = buffer.items.lock();
    if items.read(txn).is_empty() {
        return Ok(None);
    }
    Ok(items.write(txn).and_then(VecDeque::pop_front))
}

fn size(buffer: &Buffer, txn: Option<&TxnScope>, args: &[Value]) -> Result<Option<Value>, SiteError> {
    if !args.is_empty() {
        return Err(SiteError::arity(0, args.len()));
    }
    let len = buffer.items.lock().read(txn).len();
    Ok(Some(Value::Int(len as i64)))
}

fn read(cell: &Shared<Value>, txn: Option<&TxnScope>, args: &[Value]) -> Result<Option<Value>, SiteError> {
    if !args.is_empty() {
        return Err(SiteError::arity(0, args.len()));
    }
    Ok(Some(cell.lock().read(txn).clone()))
}

fn write(cell: &Shared<Value>, txn: Option<&TxnScope>, args: &[Value]) -> Result<Option<Value>, SiteError> {
    let [value] = args else {
        return Err(SiteError::arity(1, args.len()));
    };
    Ok(cell.lock().write(txn).map(|current| {
        *current = value.clone();
        Value::Signal
    }))
}

/// The operations of `state` as a record of sites.
fn record<S: Cohort + 'static>(state: Arc<S>, methods: &[(&str, Operation<S>)]) -> Value {
    Value::record(methods.iter().map(|(name, run)| {
        let site = Site::transactional(
            name,
            Method {
                state: Arc::clone(&state),
                run: *run,
            },
        );
        (*name, Value::from(site))
    }))
}

pub fn register(sites: &mut SiteRegistry) {
    sites.register(Site::transactional("Abort", AbortSite));

    sites.register(Site::pure("TBuffer", |args| {
        let capacity = match args {
            [Value::Int(n)] if *n > 0 => *n as usize,
            [other] => return Err(SiteError::expected("a positive capacity", other)),
            _ => return Err(SiteError::arity(1, args.len())),
        };
        let buffer = Arc::new(Buffer {
            capacity,
            items: Shared::new(VecDeque::new()),
        });
        Ok(record(
            buffer,
            &[("put", put as Operation<Buffer>), ("get", get), ("size", size)],
        ))
    }));

    sites.register(Site::pure("TRef", |args| {
        let [initial] = args else {
            return Err(SiteError::arity(1, args.len()));
        };
        let cell = Arc::new(Shared::new(initial.clone()));
        Ok(record(
            cell,
            &[("read", read as Operation<Shared<Value>>), ("write", write)],
        ))
    }));
}

/// Aborts the caller's transaction. Outside a transaction it just halts.
struct AbortSite;

impl TransactionalSite for AbortSite {
    fn call(
        &self,
        cx: &mut SiteContext<'_>,
        _args: &[Value],
    ) -> Result<Option<Value>, SiteError> {
        cx.abort_transaction();
        Ok(None)
    }
}
