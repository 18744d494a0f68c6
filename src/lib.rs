//! Execution core for an Orc-style concurrent orchestration language.
//!
//! Programs arrive as a small expression tree ([`orc::ast`]), are compiled into a node graph
//! ([`runtime::compiler`]) and run by a single-threaded [`Engine`](runtime::Engine) that
//! drives any number of lightweight tokens through the graph. Blocking and stateful
//! functionality lives behind sites ([`runtime::site`]); the builtin ones are in
//! [`orc::builtin`].

pub mod location;
pub mod orc;
pub mod runtime;
pub mod spawn;

#[cfg(test)]
mod test;
