use arcstr::ArcStr;
use miette::LabeledSpan;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Point {
    // 0-based
    pub offset: u32,
    // 0-based
    pub row: u32,
    // 0-based
    pub column: u32,
}

/// Source location attached to call sites by the front end.
///
/// Tokens capture the span of the last node they entered, so a failure surfacing during
/// an asynchronous resume is still attributed to the call that started it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
    #[default]
    None,
    At {
        start: Point,
        end: Point,
        file: FileName,
    },
}

impl Span {
    pub fn points(&self) -> Option<(Point, Point)> {
        match self {
            Self::None => None,
            Self::At { start, end, .. } => Some((*start, *end)),
        }
    }

    /// Miette labels pointing at this span, provided it fits inside `code`.
    pub fn labels(&self, code: &str) -> Vec<LabeledSpan> {
        match self {
            Self::At { start, end, .. } if (end.offset as usize) <= code.len() => {
                vec![LabeledSpan::underline(
                    start.offset as usize..end.offset as usize,
                )]
            }
            _ => vec![],
        }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "<unknown location>"),
            Self::At { start, file, .. } => {
                write!(f, "{}:{}:{}", file.0, start.row + 1, start.column + 1)
            }
        }
    }
}

impl Point {
    pub fn point_span(&self, file: FileName) -> Span {
        Span::At {
            start: *self,
            end: *self,
            file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(pub ArcStr);

impl From<&str> for FileName {
    fn from(path: &str) -> Self {
        FileName(path.into())
    }
}

impl From<String> for FileName {
    fn from(path: String) -> Self {
        FileName(path.into())
    }
}

impl From<&Path> for FileName {
    fn from(path: &Path) -> Self {
        (&*path.to_string_lossy()).into()
    }
}
