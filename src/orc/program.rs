//! Loading programs from the JSON interchange format.

use std::fmt::{self, Display};
use std::path::Path;
use std::sync::Arc;

use super::ast::Expression;
use crate::location::{FileName, Point, Span};
use crate::runtime::compiler::{compile, CompileError, Compiled};
use crate::runtime::site::SiteRegistry;

#[derive(Debug)]
pub enum ProgramError {
    Io {
        file: FileName,
        error: std::io::Error,
    },
    Json {
        span: Span,
        message: String,
    },
    Compile(CompileError),
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { file, error } => write!(f, "Could not read `{}`: {error}", file.0),
            Self::Json { message, .. } => write!(f, "Malformed program: {message}"),
            Self::Compile(error) => write!(f, "{error}"),
        }
    }
}

impl From<CompileError> for ProgramError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl ProgramError {
    pub fn to_report(&self, source_code: Option<&str>) -> miette::Report {
        match self {
            Self::Io { .. } => miette::miette!("{}", self),
            Self::Json { span, .. } => {
                let labels = source_code.map(|code| span.labels(code)).unwrap_or_default();
                let report = miette::miette!(labels = labels, "{}", self);
                match source_code {
                    Some(code) => report.with_source_code(code.to_owned()),
                    None => report,
                }
            }
            Self::Compile(error) => error.to_report(),
        }
    }
}

/// The byte offset of a 1-based line/column pair, as serde_json reports them.
fn point_at(source: &str, line: usize, column: usize) -> Point {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let offset = (line_start + column.saturating_sub(1)).min(source.len());
    Point {
        offset: offset as u32,
        row: line.saturating_sub(1) as u32,
        column: column.saturating_sub(1) as u32,
    }
}

pub fn parse(file: FileName, source: &str) -> Result<Expression, ProgramError> {
    serde_json::from_str(source).map_err(|error| {
        let start = point_at(source, error.line(), error.column());
        ProgramError::Json {
            span: start.point_span(file),
            message: error.to_string(),
        }
    })
}

pub fn load(path: &Path) -> Result<(Expression, String), ProgramError> {
    let file = FileName::from(path);
    let source = std::fs::read_to_string(path).map_err(|error| ProgramError::Io {
        file: file.clone(),
        error,
    })?;
    let expression = parse(file, &source)?;
    Ok((expression, source))
}

pub fn build(expression: &Expression, sites: &SiteRegistry) -> Result<Arc<Compiled>, ProgramError> {
    Ok(Arc::new(compile(expression, sites)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_point_into_the_source() {
        let source = "{\n  \"parallel\": [\n    {\"bogus\": 1}\n  ]\n}";
        let Err(ProgramError::Json { span, .. }) = parse("p.json".into(), source) else {
            panic!("expected a JSON error");
        };
        let (start, _) = span.points().unwrap();
        assert_eq!(start.row, 2);
        assert_eq!(&source[..start.offset as usize].lines().count(), &3);
    }
}
