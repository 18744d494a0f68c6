//! The site-call protocol: how a token invokes functionality outside the node graph.
//!
//! A site is one of a fixed set of call kinds, chosen once when the site is built. The kind
//! decides how the engine drives the call:
//!
//! - [`Site::Pure`] runs immediately on the scheduling thread and always has an answer.
//! - [`Site::Partial`] runs immediately but may decline, in which case the caller halts.
//! - [`Site::Threaded`] returns a future that is spawned off the scheduling thread; its
//!   outcome comes back through the engine's returning queue.
//! - [`Site::Transactional`] runs immediately with a [`SiteContext`] that exposes the
//!   caller's transaction, so the site can enlist itself as a cohort before touching any
//!   transaction-sensitive state.
//! - [`Site::Timer`] suspends the caller on one of the engine's virtual clocks.
//!
//! Every call ends in one [`Outcome`]: publish a value, halt silently, or fail with an error
//! that is reported against the caller's source location.

use arcstr::ArcStr;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use super::clock::ClockId;
use super::cohort::Cohort;
use super::transaction::TxnScope;
use crate::orc::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct SiteError(pub String);

impl SiteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn expected(what: &str, found: &Value) -> Self {
        Self(format!("expected {what}, found {} `{found:?}`", found.kind()))
    }

    pub fn arity(expected: usize, found: usize) -> Self {
        Self(format!("expected {expected} argument(s), found {found}"))
    }
}

impl Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a site call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Publish(Value),
    Halt,
    Fail(SiteError),
    /// Sent by cohort votes: abort the transaction the voting token belongs to.
    Abort,
}

impl From<Result<Option<Value>, SiteError>> for Outcome {
    fn from(result: Result<Option<Value>, SiteError>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Publish(value),
            Ok(None) => Outcome::Halt,
            Err(error) => Outcome::Fail(error),
        }
    }
}

pub type PureFn = Arc<dyn Fn(&[Value]) -> Result<Value, SiteError> + Send + Sync>;
pub type PartialFn = Arc<dyn Fn(&[Value]) -> Result<Option<Value>, SiteError> + Send + Sync>;
pub type ThreadedFn = Arc<
    dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, SiteError>> + Send + Sync,
>;

/// A site that participates in transactions.
pub trait TransactionalSite: Send + Sync {
    fn call(
        &self,
        cx: &mut SiteContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, SiteError>;
}

pub enum Site {
    Pure { name: ArcStr, run: PureFn },
    Partial { name: ArcStr, run: PartialFn },
    Threaded { name: ArcStr, run: ThreadedFn },
    Transactional {
        name: ArcStr,
        site: Arc<dyn TransactionalSite>,
    },
    Timer { name: ArcStr, clock: ClockId },
}

impl Site {
    pub fn pure(
        name: &str,
        run: impl Fn(&[Value]) -> Result<Value, SiteError> + Send + Sync + 'static,
    ) -> Self {
        Site::Pure {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn partial(
        name: &str,
        run: impl Fn(&[Value]) -> Result<Option<Value>, SiteError> + Send + Sync + 'static,
    ) -> Self {
        Site::Partial {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn threaded(
        name: &str,
        run: impl Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, SiteError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Site::Threaded {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn transactional(name: &str, site: impl TransactionalSite + 'static) -> Self {
        Site::Transactional {
            name: name.into(),
            site: Arc::new(site),
        }
    }

    /// Suspends the caller for as many ticks of `clock` as its one integer argument says,
    /// then publishes a signal.
    pub fn timer(name: &str, clock: ClockId) -> Self {
        Site::Timer {
            name: name.into(),
            clock,
        }
    }

    pub fn name(&self) -> &ArcStr {
        match self {
            Site::Pure { name, .. }
            | Site::Partial { name, .. }
            | Site::Threaded { name, .. }
            | Site::Transactional { name, .. }
            | Site::Timer { name, .. } => name,
        }
    }
}

impl From<Site> for Value {
    fn from(site: Site) -> Self {
        Value::Site(Arc::new(site))
    }
}

/// What a transactional site sees of its caller.
pub struct SiteContext<'a> {
    scope: Option<&'a TxnScope>,
    pub(crate) enlisted: Vec<Arc<dyn Cohort>>,
    pub(crate) abort: bool,
}

impl<'a> SiteContext<'a> {
    pub(crate) fn new(scope: Option<&'a TxnScope>) -> Self {
        Self {
            scope,
            enlisted: vec![],
            abort: false,
        }
    }

    /// The innermost transaction enclosing the caller, if any.
    pub fn transaction(&self) -> Option<&'a TxnScope> {
        self.scope
    }

    /// Registers `cohort` with the caller's transaction and all of its ancestors.
    /// Outside a transaction this does nothing.
    pub fn enlist(&mut self, cohort: Arc<dyn Cohort>) {
        if self.scope.is_some() {
            self.enlisted.push(cohort);
        }
    }

    /// Requests an abort of the caller's transaction once the call returns.
    pub fn abort_transaction(&mut self) {
        self.abort = self.scope.is_some();
    }
}

/// Names visible to the compiler as `site(name)` arguments.
#[derive(Default, Clone)]
pub struct SiteRegistry {
    sites: IndexMap<ArcStr, Value>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, site: Site) {
        let name = site.name().clone();
        self.sites.insert(name, site.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.sites.get(name)
    }
}
