pub mod ast;
pub mod builtin;
pub mod program;
pub mod value;
