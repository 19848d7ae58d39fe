//! Report sinks shared by pool workers
//!
//! Workers never write to the output stream directly. Each builds its block
//! in a private buffer and submits it here once the item is done, so a
//! block always lands on the stream in one piece.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Destination for finished per-item report blocks
pub trait ReportSink: Sync {
    /// Hand over the complete block for item `index`.
    ///
    /// Every item of a batch must submit exactly once, even when it produced
    /// nothing, so sinks that order by index can advance.
    fn submit(&self, index: usize, block: Vec<u8>) -> io::Result<()>;
}

struct OrderedState<W> {
    writer: W,
    next: usize,
    parked: BTreeMap<usize, Vec<u8>>,
}

/// Emits blocks strictly in input order.
///
/// Holds a cursor on the next index allowed to reach the stream. A block
/// that arrives early is parked; whichever worker submits the cursor's block
/// also writes every parked block that directly follows it. Workers wait on
/// each other only for the write itself, never for each other's work.
pub struct OrderedSink<W> {
    state: Mutex<OrderedState<W>>,
}

impl<W: Write> OrderedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(OrderedState {
                writer,
                next: 0,
                parked: BTreeMap::new(),
            }),
        }
    }

    /// Number of finished blocks still waiting for an earlier item
    pub fn pending(&self) -> usize {
        self.lock().parked.len()
    }

    /// Index of the next block allowed to reach the stream
    pub fn cursor(&self) -> usize {
        self.lock().next
    }

    /// Give back the writer. Blocks still parked are discarded.
    pub fn into_inner(self) -> W {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            state.parked.is_empty(),
            "ordered sink dropped {} unflushed blocks",
            state.parked.len()
        );
        state.writer
    }

    fn lock(&self) -> MutexGuard<'_, OrderedState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReportSink for OrderedSink<W> {
    fn submit(&self, index: usize, block: Vec<u8>) -> io::Result<()> {
        let mut state = self.lock();
        debug_assert!(
            index >= state.next && !state.parked.contains_key(&index),
            "block {index} submitted twice"
        );

        state.parked.insert(index, block);

        // The whole contiguous run drains even past a failed write; the first error is returned
        let mut wrote = false;
        let mut first_error = None;
        loop {
            let next = state.next;
            let Some(block) = state.parked.remove(&next) else {
                break;
            };
            state.next += 1;
            if let Err(e) = state.writer.write_all(&block) {
                first_error.get_or_insert(e);
            }
            wrote = true;
        }

        if wrote && let Err(e) = state.writer.flush() {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Emits each block as soon as its item finishes.
///
/// Blocks are contiguous but appear in completion order. Suited to output
/// where a stable order does not matter and early feedback does.
pub struct CompletionSink<W> {
    writer: Mutex<W>,
}

impl<W: Write> CompletionSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReportSink for CompletionSink<W> {
    fn submit(&self, _index: usize, block: Vec<u8>) -> io::Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&block)?;
        writer.flush()
    }
}
