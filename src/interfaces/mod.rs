//! Process-facing adapters: command line configuration and OS signals.

pub mod cli;
pub mod signals;
