//! The application factory: turns a validated software assembly into a
//! running, connected, configured waveform.
//!
//! One [`ApplicationFactory`] is constructed per installed assembly.
//! Each `create` call runs a linear deployment pipeline: bind a unique
//! waveform naming context, place every component on a device through
//! the allocation manager (honoring user assignments, host collocation,
//! and uses-device clauses), load and execute the selected
//! implementations, wait for the launched components to register back,
//! then initialize, connect, configure, and wire the external surface.
//! Any failure after the naming context is bound unwinds every side
//! effect the attempt produced before the error is returned.

mod component;
mod error;
mod expr;
mod front;
mod ledger;
mod matcher;
mod pipeline;
mod planner;
pub mod reserved;

pub use component::{ComponentInfo, SoftpkgLoad};
pub use error::Error;
pub use front::ApplicationFactory;
pub use ledger::ScopedLedger;
pub use matcher::{matching_tuples, merge_os, merge_processors};
