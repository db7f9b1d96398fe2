#![deny(missing_docs)]
//! # Retort — a chemical machine for Rust
//!
//! Retort runs programs written in the join calculus: computation is
//! declared as a set of *reactions* over typed, named *molecules*. A
//! [`Site`] holds a multiset of emitted molecule values (the soup);
//! whenever some combination of molecules matches a reaction's input
//! pattern and its guards hold, the runtime atomically removes those
//! molecules and runs the reaction body on a worker [`Pool`]. Bodies may
//! compute, emit further molecules, or reply to blocking emitters.
//!
//! ```no_run
//! use retort::prelude::*;
//!
//! fn main() -> retort::errors::Result<()> {
//!     let pool = Pool::fixed("main", 4);
//!     let counter = Molecule::<i64>::new("counter");
//!     let incr = Molecule::<()>::simple("incr");
//!
//!     let c = counter.clone();
//!     site(&pool, vec![reaction(
//!         vec![counter.capture(), incr.wildcard()],
//!         move |inputs| {
//!             let n: i64 = inputs.get(0);
//!             c.emit(n + 1)
//!         },
//!     )])?;
//!
//!     counter.emit(0)?;
//!     incr.emit(())?;
//!     Ok(())
//! }
//! ```
//!
//! [`Site`]: struct.Site.html
//! [`Pool`]: struct.Pool.html
#[macro_use]
extern crate log;

mod bag;
mod molecule;
mod pool;
mod reaction;
mod reply;
mod reporter;
mod site;

pub mod errors;

// Pub uses
pub use crate::molecule::{BlockingMolecule, Inputs, Molecule, MoleculeRef, Payload};
pub use crate::pool::Pool;
pub use crate::reaction::{
    cross2, cross3, reaction, CrossGuard, InputDef, OutputDef, Reaction,
};
pub use crate::reply::{ReplyFuture, Signal};
pub use crate::reporter::{LogReporter, ReportEvent, Reporter};
pub use crate::site::{site, Site, SiteBuilder};

/// The user-facing surface in one import.
pub mod prelude {
    pub use crate::errors::{Error, Result};
    pub use crate::{
        cross2, cross3, reaction, site, BlockingMolecule, Molecule, Pool, Site,
    };
}
