use arcstr::ArcStr;
use std::fmt::{self, Display};

use super::site::SiteError;
use crate::location::Span;
use crate::orc::value::Value;

/// A failure local to one token. The token is killed, the engine keeps going.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenError {
    ArityMismatch {
        name: ArcStr,
        expected: usize,
        found: usize,
    },
    Uncallable(Value),
    NotARecord(Value),
    NoSuchField(ArcStr),
    Site { site: ArcStr, error: SiteError },
    /// The live-token ceiling was reached; only the requesting token fails.
    ResourceExhausted { limit: usize },
}

impl Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "`{name}` takes {expected} argument(s) but was called with {found}"
            ),
            Self::Uncallable(value) => write!(f, "{} `{value:?}` cannot be called", value.kind()),
            Self::NotARecord(value) => {
                write!(f, "{} `{value:?}` has no fields", value.kind())
            }
            Self::NoSuchField(field) => write!(f, "no field named `{field}`"),
            Self::Site { site, error } => write!(f, "{site}: {error}"),
            Self::ResourceExhausted { limit } => {
                write!(f, "too many live tokens (limit is {limit})")
            }
        }
    }
}

/// A token failure as reported through the diagnostic channel: the error plus the source
/// location the token last entered.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub span: Span,
    pub error: TokenError,
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.error, self.span)
    }
}

impl Failure {
    pub fn to_report(&self, source_code: Option<&str>) -> miette::Report {
        let labels = source_code
            .map(|code| self.span.labels(code))
            .unwrap_or_default();
        let report = miette::miette!(labels = labels, "{}", self.error);
        match source_code {
            Some(code) => report.with_source_code(code.to_owned()),
            None => report,
        }
    }
}

/// A condition that can only arise from a bug in the compiler or in the engine itself.
/// It stops the whole run.
#[derive(Clone, Debug, PartialEq)]
pub enum CoreError {
    UnboundIndex { index: usize, depth: usize },
    EnvUnderflow { count: usize, depth: usize },
    StackUnderflow,
    DoubleBind,
    NotACell,
    /// A token reached the exit of a scope it is not in.
    ScopeMismatch(&'static str),
    Missing(&'static str),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundIndex { index, depth } => write!(
                f,
                "environment lookup of #{index} in an environment of depth {depth}"
            ),
            Self::EnvUnderflow { count, depth } => write!(
                f,
                "cannot unwind {count} binding(s) from an environment of depth {depth}"
            ),
            Self::StackUnderflow => write!(f, "return with an empty call stack"),
            Self::DoubleBind => write!(f, "a pruning cell was bound twice"),
            Self::NotACell => write!(f, "a pruning result reached a group that is not a cell"),
            Self::ScopeMismatch(what) => write!(f, "token left a {what} it was not in"),
            Self::Missing(what) => write!(f, "reference to a {what} that no longer exists"),
        }
    }
}

impl std::error::Error for CoreError {}
