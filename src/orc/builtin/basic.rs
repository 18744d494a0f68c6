//! Sites that never block: printing, conditionals and arithmetic.

use std::sync::Arc;

use super::console::Console;
use crate::orc::value::Value;
use crate::runtime::site::{Site, SiteError, SiteRegistry};

fn one(args: &[Value]) -> Result<&Value, SiteError> {
    match args {
        [value] => Ok(value),
        _ => Err(SiteError::arity(1, args.len())),
    }
}

fn two_ints(args: &[Value]) -> Result<(i64, i64), SiteError> {
    match args {
        [Value::Int(a), Value::Int(b)] => Ok((*a, *b)),
        [a, b] => Err(SiteError::expected(
            "two integers",
            if a.as_int().is_none() { a } else { b },
        )),
        _ => Err(SiteError::arity(2, args.len())),
    }
}

fn overflow() -> SiteError {
    SiteError::new("integer overflow")
}

fn condition(args: &[Value]) -> Result<bool, SiteError> {
    let value = one(args)?;
    value
        .as_bool()
        .ok_or_else(|| SiteError::expected("a boolean", value))
}

pub fn register(sites: &mut SiteRegistry, console: Arc<dyn Console>) {
    sites.register(Site::pure("Println", move |args| {
        console.write_line(&one(args)?.to_string());
        Ok(Value::Signal)
    }));

    sites.register(Site::pure("Let", |args| {
        Ok(match args {
            [] => Value::Signal,
            [value] => value.clone(),
            values => Value::tuple(values.iter().cloned()),
        })
    }));

    sites.register(Site::partial("Ift", |args| {
        Ok(condition(args)?.then_some(Value::Signal))
    }));
    sites.register(Site::partial("Iff", |args| {
        Ok((!condition(args)?).then_some(Value::Signal))
    }));

    sites.register(Site::pure("Add", |args| match args {
        [Value::Str(a), Value::Str(b)] => Ok(Value::string(format!("{a}{b}"))),
        _ => {
            let (a, b) = two_ints(args)?;
            a.checked_add(b).map(Value::Int).ok_or_else(overflow)
        }
    }));
    sites.register(Site::pure("Sub", |args| {
        let (a, b) = two_ints(args)?;
        a.checked_sub(b).map(Value::Int).ok_or_else(overflow)
    }));
    sites.register(Site::pure("Mul", |args| {
        let (a, b) = two_ints(args)?;
        a.checked_mul(b).map(Value::Int).ok_or_else(overflow)
    }));
    sites.register(Site::pure("Div", |args| {
        let (a, b) = two_ints(args)?;
        if b == 0 {
            return Err(SiteError::new("division by zero"));
        }
        a.checked_div(b).map(Value::Int).ok_or_else(overflow)
    }));
    sites.register(Site::pure("Mod", |args| {
        let (a, b) = two_ints(args)?;
        if b == 0 {
            return Err(SiteError::new("division by zero"));
        }
        a.checked_rem_euclid(b).map(Value::Int).ok_or_else(overflow)
    }));

    sites.register(Site::pure("Eq", |args| match args {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(SiteError::arity(2, args.len())),
    }));
    sites.register(Site::pure("Less", |args| {
        let (a, b) = two_ints(args)?;
        Ok(Value::Bool(a < b))
    }));
    sites.register(Site::pure("Greater", |args| {
        let (a, b) = two_ints(args)?;
        Ok(Value::Bool(a > b))
    }));

    sites.register(Site::pure("Error", |args| {
        Err(SiteError::new(one(args)?.to_string()))
    }));
}
