pub mod arena;
pub mod clock;
pub mod cohort;
pub mod compiler;
pub mod engine;
pub mod env;
pub mod error;
pub mod graph;
pub mod group;
pub mod region;
pub mod site;
pub mod stats;
mod step;
pub mod token;
pub mod transaction;

pub use clock::ClockId;
pub use cohort::{Cohort, Versioned, Vote};
pub use compiler::{compile, CompileError, Compiled};
pub use engine::{Engine, EngineConfig, Observer, PrintObserver, Terminator};
pub use error::{CoreError, Failure, TokenError};
pub use site::{Outcome, Site, SiteContext, SiteError, SiteRegistry, TransactionalSite};
pub use stats::Stats;
pub use transaction::TxnScope;
