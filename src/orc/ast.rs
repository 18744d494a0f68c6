//! The simplified expression tree handed over by the front end.
//!
//! Variables are de Bruijn indices: `Variable(0)` is the innermost binding. The binders are
//! `Sequential` (its right side sees the left side's publication), `Pruning` (its left side
//! sees the right side's first publication), and `Declare`, which binds its definitions in
//! declaration order; inside a definition body the parameters come after the definitions.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::location::Span;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Signal,
    Bool(bool),
    Int(i64),
    String(ArcStr),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Literal(Literal),
    Variable(usize),
    Site(ArcStr),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Stop,
    Value(Argument),
    Call {
        target: Argument,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
    Field {
        target: Argument,
        field: ArcStr,
    },
    Parallel(Box<Expression>, Box<Expression>),
    Sequential(Box<Expression>, Box<Expression>),
    Pruning {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Otherwise(Box<Expression>, Box<Expression>),
    Declare {
        defs: Vec<Definition>,
        body: Box<Expression>,
    },
    Atomic(Box<Expression>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: ArcStr,
    pub arity: usize,
    pub body: Expression,
}

impl Argument {
    pub fn var(index: usize) -> Self {
        Argument::Variable(index)
    }

    pub fn site(name: &str) -> Self {
        Argument::Site(name.into())
    }

    pub fn int(n: i64) -> Self {
        Argument::Literal(Literal::Int(n))
    }

    pub fn string(s: &str) -> Self {
        Argument::Literal(Literal::String(s.into()))
    }

    pub fn signal() -> Self {
        Argument::Literal(Literal::Signal)
    }
}

impl Expression {
    pub fn value(argument: Argument) -> Self {
        Expression::Value(argument)
    }

    pub fn int(n: i64) -> Self {
        Expression::Value(Argument::int(n))
    }

    pub fn var(index: usize) -> Self {
        Expression::Value(Argument::var(index))
    }

    pub fn call(target: Argument, args: impl IntoIterator<Item = Argument>) -> Self {
        Expression::Call {
            target,
            args: args.into_iter().collect(),
            span: Span::None,
        }
    }

    /// A call to a site by name.
    pub fn site(name: &str, args: impl IntoIterator<Item = Argument>) -> Self {
        Self::call(Argument::site(name), args)
    }

    pub fn field(target: Argument, field: &str) -> Self {
        Expression::Field {
            target,
            field: field.into(),
        }
    }

    pub fn with_span(self, span: Span) -> Self {
        match self {
            Expression::Call { target, args, .. } => Expression::Call { target, args, span },
            other => other,
        }
    }

    pub fn parallel(left: Self, right: Self) -> Self {
        Expression::Parallel(Box::new(left), Box::new(right))
    }

    /// `left >x> right`
    pub fn sequential(left: Self, right: Self) -> Self {
        Expression::Sequential(Box::new(left), Box::new(right))
    }

    /// `left <x< right`
    pub fn pruning(left: Self, right: Self) -> Self {
        Expression::Pruning {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn otherwise(left: Self, right: Self) -> Self {
        Expression::Otherwise(Box::new(left), Box::new(right))
    }

    pub fn declare(defs: Vec<Definition>, body: Self) -> Self {
        Expression::Declare {
            defs,
            body: Box::new(body),
        }
    }

    pub fn atomic(body: Self) -> Self {
        Expression::Atomic(Box::new(body))
    }

    /// Right-nested parallel composition of all `branches`; `stop` when empty.
    pub fn any(branches: impl IntoIterator<Item = Self>) -> Self {
        let mut branches: Vec<Self> = branches.into_iter().collect();
        let Some(mut result) = branches.pop() else {
            return Expression::Stop;
        };
        while let Some(branch) = branches.pop() {
            result = Self::parallel(branch, result);
        }
        result
    }

    /// `first >> second >> ...`, ignoring every intermediate publication.
    pub fn then_all(steps: impl IntoIterator<Item = Self>) -> Self {
        let mut steps: Vec<Self> = steps.into_iter().collect();
        let Some(mut result) = steps.pop() else {
            return Expression::Value(Argument::signal());
        };
        while let Some(step) = steps.pop() {
            result = Self::sequential(step, result.shift(1));
        }
        result
    }

    /// Adjusts free variables for `amount` new binders introduced around this expression.
    pub fn shift(self, amount: usize) -> Self {
        self.shift_above(amount, 0)
    }

    fn shift_above(self, amount: usize, cutoff: usize) -> Self {
        let arg = |argument: Argument| match argument {
            Argument::Variable(i) if i >= cutoff => Argument::Variable(i + amount),
            other => other,
        };
        match self {
            Expression::Stop => Expression::Stop,
            Expression::Value(argument) => Expression::Value(arg(argument)),
            Expression::Call { target, args, span } => Expression::Call {
                target: arg(target),
                args: args.into_iter().map(arg).collect(),
                span,
            },
            Expression::Field { target, field } => Expression::Field {
                target: arg(target),
                field,
            },
            Expression::Parallel(a, b) => Expression::Parallel(
                Box::new(a.shift_above(amount, cutoff)),
                Box::new(b.shift_above(amount, cutoff)),
            ),
            Expression::Sequential(a, b) => Expression::Sequential(
                Box::new(a.shift_above(amount, cutoff)),
                Box::new(b.shift_above(amount, cutoff + 1)),
            ),
            Expression::Pruning { left, right } => Expression::Pruning {
                left: Box::new(left.shift_above(amount, cutoff + 1)),
                right: Box::new(right.shift_above(amount, cutoff)),
            },
            Expression::Otherwise(a, b) => Expression::Otherwise(
                Box::new(a.shift_above(amount, cutoff)),
                Box::new(b.shift_above(amount, cutoff)),
            ),
            Expression::Declare { defs, body } => {
                let inner = cutoff + defs.len();
                Expression::Declare {
                    defs: defs
                        .into_iter()
                        .map(|def| Definition {
                            body: def.body.shift_above(amount, inner + def.arity),
                            ..def
                        })
                        .collect(),
                    body: Box::new(body.shift_above(amount, inner)),
                }
            }
            Expression::Atomic(body) => {
                Expression::Atomic(Box::new(body.shift_above(amount, cutoff)))
            }
        }
    }
}

impl Definition {
    pub fn new(name: &str, arity: usize, body: Expression) -> Self {
        Self {
            name: name.into(),
            arity,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_the_interchange_format() {
        let json = r#"{
            "sequential": [
                {"parallel": [{"value": {"literal": {"int": 1}}}, {"value": {"literal": {"int": 2}}}]},
                {"call": {"target": {"site": "Println"}, "args": [{"variable": 0}]}}
            ]
        }"#;
        let expression: Expression = serde_json::from_str(json).unwrap();
        assert_eq!(
            expression,
            Expression::sequential(
                Expression::parallel(Expression::int(1), Expression::int(2)),
                Expression::site("Println", [Argument::var(0)]),
            )
        );
    }

    #[test]
    fn shift_skips_bound_variables() {
        let expression = Expression::sequential(
            Expression::var(0),
            Expression::site("Add", [Argument::var(0), Argument::var(1)]),
        );
        assert_eq!(
            expression.shift(2),
            Expression::sequential(
                Expression::var(2),
                Expression::site("Add", [Argument::var(0), Argument::var(3)]),
            )
        );
    }

    #[test]
    fn then_all_discards_intermediate_results() {
        let expression = Expression::then_all([
            Expression::site("Println", [Argument::int(1)]),
            Expression::var(0),
        ]);
        assert_eq!(
            expression,
            Expression::sequential(
                Expression::site("Println", [Argument::int(1)]),
                Expression::var(1),
            )
        );
    }
}
