//! Garage Module
//!
//! One-time provisioning of the local Garage object-storage node and the
//! handoff to the long-running `garage server`.

mod bootstrap;
mod cli;
mod parse;

pub use bootstrap::{BootstrapOutcome, BootstrapReport, Bootstrapper};
pub use cli::GarageCli;
pub use parse::{listing_contains, parse_node_id};
