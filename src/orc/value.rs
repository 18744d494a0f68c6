use arcstr::ArcStr;
use indexmap::IndexMap;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, OnceLock};

use crate::runtime::env::Env;
use crate::runtime::graph::{DefGroup, Index};
use crate::runtime::group::GroupId;
use crate::runtime::site::Site;

/// A value published by an expression.
#[derive(Clone)]
pub enum Value {
    Signal,
    Bool(bool),
    Int(i64),
    Str(ArcStr),
    Tuple(Arc<[Value]>),
    Record(Arc<IndexMap<ArcStr, Value>>),
    Closure(Closure),
    Site(Arc<Site>),
}

/// One member of a group of mutually recursive definitions, together with the environment
/// the group was declared in.
///
/// The captured environment does not contain the group itself; the siblings are re-bound
/// on every call, which keeps recursive closures free of reference cycles.
#[derive(Clone)]
pub struct Closure {
    pub defs: Index<DefGroup>,
    pub member: usize,
    pub env: Env,
}

/// An environment entry: either a plain value or the pending result of a pruning.
#[derive(Clone, Debug)]
pub enum Binding {
    Value(Value),
    Future(Future),
}

/// A reference to the cell a pruning combinator binds.
///
/// The slot outlives the cell's record in the engine: once bound, reads go straight to the
/// slot, and an empty slot whose cell is gone means the value will never arrive.
#[derive(Clone)]
pub struct Future {
    pub cell: GroupId,
    pub slot: Arc<OnceLock<Value>>,
}

impl Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(value) => write!(f, "Future({:?} = {:?})", self.cell, value),
            None => write!(f, "Future({:?})", self.cell),
        }
    }
}

impl Value {
    pub fn string(s: impl Into<ArcStr>) -> Self {
        Value::Str(s.into())
    }

    pub fn tuple(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(values.into_iter().collect())
    }

    pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Record(Arc::new(
            fields
                .into_iter()
                .map(|(name, value)| (ArcStr::from(name), value))
                .collect(),
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Signal => "signal",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
            Value::Closure(_) => "closure",
            Value::Site(_) => "site",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Signal, Value::Signal) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => {
                a.defs == b.defs && a.member == b.member
            }
            (Value::Site(a), Value::Site(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

fn write_separated(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{value:?}")?;
    }
    Ok(())
}

/// `Display` is what `Println` writes: strings come out raw.
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// `Debug` is the literal notation, used for top-level publications.
impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Signal => write!(f, "signal"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Tuple(values) => {
                write!(f, "(")?;
                write_separated(f, values)?;
                write!(f, ")")
            }
            Value::Record(fields) => {
                write!(f, "{{. ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value:?}")?;
                }
                write!(f, " .}}")
            }
            Value::Closure(closure) => {
                write!(f, "<closure {:?}/{}>", closure.defs, closure.member)
            }
            Value::Site(site) => write!(f, "<site {}>", site.name()),
        }
    }
}
