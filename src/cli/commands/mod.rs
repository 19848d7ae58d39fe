//! Command implementations for the alignscan CLI
//!
//! Each subcommand lives in its own module.

pub mod config;
pub mod scan;
pub mod version;
