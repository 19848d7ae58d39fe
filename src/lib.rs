//! # alignscan - partition alignment checks for virtual machine disks
//!
//! Reads the partition tables of guest disk images and reports partitions
//! whose start offset is not aligned to 4K or 64K. Many guests are scanned
//! at once on a bounded pool of worker threads, and their reports are
//! printed without interleaving.
//!
//! ## Quick Start
//!
//! ```bash
//! # One guest, from disk images
//! alignscan -a disk.img
//!
//! # Every guest in an inventory, four at a time
//! alignscan -c domains.toml -P 4
//! ```
//!
//! The [`parallel`] module holds the reusable pieces: a worker pool, ordered
//! and completion-order report sinks, and a locked reduction.

pub mod align;
pub mod cli;
pub mod config;
pub mod domains;
pub mod inspect;
pub mod parallel;

pub use align::{Orchestrator, ScanOutcome};
pub use cli::{Cli, Output};
pub use config::AlignScanConfig;

/// Result type alias for alignscan operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
