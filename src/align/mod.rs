//! Partition alignment checks
//!
//! A partition's alignment is the largest power of two dividing its start
//! offset, kept as the exponent. The scan reports one line per partition
//! and folds every exponent into a shared minimum, which decides the exit
//! status.

use anyhow::{Context, Result};
use std::fmt;
use std::io::Write;

use crate::inspect::{InspectionHandle, PartitionTable};
use crate::parallel::Reduction;

pub mod orchestrator;

pub use orchestrator::{ExitTiers, Orchestrator, ScanOptions, ScanOutcome};

/// Identity for the worst-alignment reduction: no partition seen yet.
pub const NO_CONSTRAINT: u32 = u32::MAX;

/// Exponent reported for a partition starting at byte 0
const ZERO_START_ALIGNMENT: u32 = 64;

/// Alignment exponent of a start offset in bytes.
pub fn alignment_exponent(start: u64) -> u32 {
    if start == 0 {
        ZERO_START_ALIGNMENT
    } else {
        start.trailing_zeros()
    }
}

/// How a partition's alignment is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 64K aligned or better
    Ok,
    /// Below 64K: slow on storage with large stripes (NetApp and similar)
    Below64K,
    /// Below 4K: slow on practically all modern storage
    Below4K,
}

impl Verdict {
    pub fn of(alignment: u32) -> Self {
        if alignment < 12 {
            Verdict::Below4K
        } else if alignment < 16 {
            Verdict::Below64K
        } else {
            Verdict::Ok
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => write!(f, "ok"),
            Verdict::Below64K => write!(f, "bad (alignment < 64K)"),
            Verdict::Below4K => write!(f, "bad (alignment < 4K)"),
        }
    }
}

/// One report line, without the trailing newline.
pub fn format_partition_line(
    prefix: Option<&str>,
    device: &str,
    part_num: u32,
    start: u64,
    alignment: u32,
) -> String {
    let mut line = String::new();
    if let Some(prefix) = prefix {
        line.push_str(prefix);
        line.push(':');
    }
    line.push_str(&format!("{device}{part_num} {start:>12} "));

    if alignment < 10 {
        line.push_str(&format!("{:>12}    ", 1u64 << alignment));
    } else if alignment < 64 {
        line.push_str(&format!("{:>12}K   ", 1u64 << (alignment - 10)));
    } else {
        line.push_str("- ");
    }

    line.push_str(&Verdict::of(alignment).to_string());
    line
}

/// Scan every partition of every device on `handle`.
///
/// Writes one line per partition to `out` unless `quiet`, and folds each
/// alignment into `worst` either way. Devices without a recognisable
/// partition table are skipped.
pub fn scan_handle<H, W>(
    handle: &mut H,
    prefix: Option<&str>,
    quiet: bool,
    worst: &Reduction<u32>,
    out: &mut W,
) -> Result<()>
where
    H: InspectionHandle + ?Sized,
    W: Write + ?Sized,
{
    for device in handle.list_devices()? {
        let parts = match handle.part_list(&device)? {
            PartitionTable::Partitions(parts) => parts,
            PartitionTable::Unrecognised => {
                tracing::debug!(%device, "skipping device: unrecognised disk label");
                continue;
            }
        };

        let name = handle.canonical_device_name(&device);

        for part in parts {
            let alignment = alignment_exponent(part.part_start);
            worst.update(alignment);

            if !quiet {
                let line =
                    format_partition_line(prefix, &name, part.part_num, part.part_start, alignment);
                writeln!(out, "{line}").context("writing report line")?;
            }
        }
    }

    Ok(())
}
