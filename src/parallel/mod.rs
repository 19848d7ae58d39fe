//! Bounded parallel execution for one uniform batch of work items
//!
//! This module knows nothing about disks or domains. It provides the three
//! pieces the scan orchestrator composes:
//!
//! - [`WorkerPool`]: runs a worker closure over every item with at most
//!   `limit` threads, pulling the next unstarted item as soon as a thread is
//!   idle, and aggregates per-item failures into a [`BatchResult`].
//! - [`ReportSink`]: where each item's report block goes once its worker is
//!   done. [`OrderedSink`] emits blocks in input order, [`CompletionSink`]
//!   emits them in completion order. Both keep a block contiguous.
//! - [`Reduction`]: a value shared by all workers and combined under a lock
//!   with a commutative, associative operation.
//!
//! # Example
//!
//! ```rust
//! use alignscan::parallel::{OrderedSink, Reduction, WorkerPool};
//! use std::io::Write;
//!
//! let items = vec![12u32, 9, 20];
//! let worst = Reduction::minimum(u32::MAX);
//! let sink = OrderedSink::new(Vec::new());
//!
//! let pool = WorkerPool::with_limit(0, items.len(), 2);
//! let batch = pool
//!     .run(&items, &sink, |_, value, block| {
//!         worst.update(*value);
//!         writeln!(block, "{value}")?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! assert!(batch.is_success());
//! assert_eq!(worst.into_inner(), 9);
//! assert_eq!(sink.into_inner(), b"12\n9\n20\n");
//! ```
//!
//! # Limitations
//!
//! There is no cancellation and no timeout: every dispatched item runs until
//! its worker returns.

pub mod core;
pub mod reduction;
pub mod sink;

pub use core::{BatchResult, ItemFailure, WorkerPool, default_workers, resolve_limit};
pub use reduction::Reduction;
pub use sink::{CompletionSink, OrderedSink, ReportSink};
