//! The sites every program can name.

pub mod console;
mod basic;
mod time;
mod transactional;

use std::sync::Arc;

use crate::runtime::site::SiteRegistry;
pub use console::{Captured, Console, Stdout};

pub fn prelude(console: Arc<dyn Console>) -> SiteRegistry {
    let mut sites = SiteRegistry::new();
    basic::register(&mut sites, console);
    time::register(&mut sites);
    transactional::register(&mut sites);
    sites
}
