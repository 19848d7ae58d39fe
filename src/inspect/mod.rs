//! Disk inspection
//!
//! The scan only needs a narrow, read-only view of a guest's disks: which
//! block devices exist, and where each partition on them starts. That view
//! is the [`InspectionHandle`] trait. An [`Inspector`] opens one handle per
//! guest; handles are never shared between threads and release everything
//! they hold when dropped.
//!
//! [`DiskInspector`] is the implementation used by the CLI. It reads MBR
//! and GPT partition tables straight out of raw disk images.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod disk;
mod gpt;
mod mbr;

pub use disk::{DiskHandle, DiskInspector};

/// Sector sizes accepted for `blocksize`
pub const SUPPORTED_BLOCKSIZES: [u32; 2] = [512, 4096];

/// One disk to attach to an inspection handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub path: PathBuf,
    /// Image format; `None` means probe
    #[serde(default)]
    pub format: Option<String>,
    /// Logical sector size; `None` means probe (512, then 4096 for GPT)
    #[serde(default)]
    pub blocksize: Option<u32>,
}

impl DiskSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            blocksize: None,
        }
    }
}

/// A partition as seen by the partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Partition number as the OS names it (`/dev/sda<num>`)
    pub part_num: u32,
    /// Start offset in bytes
    pub part_start: u64,
    /// Offset of the last byte
    pub part_end: u64,
    /// Size in bytes
    pub part_size: u64,
}

impl Partition {
    /// Build from a sector range; `last_lba` is inclusive.
    ///
    /// `None` when the range is inverted or its byte offsets do not fit in 64 bits.
    pub(crate) fn from_lba(
        part_num: u32,
        first_lba: u64,
        last_lba: u64,
        sector_size: u64,
    ) -> Option<Self> {
        let part_start = first_lba.checked_mul(sector_size)?;
        let sectors = last_lba.checked_sub(first_lba)?.checked_add(1)?;
        let part_size = sectors.checked_mul(sector_size)?;
        let part_end = part_start.checked_add(part_size - 1)?;
        Some(Self {
            part_num,
            part_start,
            part_end,
            part_size,
        })
    }
}

/// Result of asking a device for its partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionTable {
    Partitions(Vec<Partition>),
    /// No partition table this inspector understands
    Unrecognised,
}

/// Read-only view of one guest's block devices
pub trait InspectionHandle {
    /// Block devices in attach order
    fn list_devices(&self) -> Result<Vec<String>>;

    /// Partitions of `device`
    fn part_list(&mut self, device: &str) -> Result<PartitionTable>;

    /// Name under which `device` is reported
    fn canonical_device_name(&self, device: &str) -> String {
        canonical_device_name(device)
    }
}

/// Opens inspection handles. Shared by all workers; each call yields a
/// handle exclusively owned by the caller.
pub trait Inspector: Sync {
    type Handle: InspectionHandle;

    fn open(&self, disks: &[DiskSpec]) -> Result<Self::Handle>;
}

/// Map hypervisor-specific device names onto `/dev/sdX`.
///
/// `/dev/vda3`, `/dev/hda3` and `/dev/xvda3` all become `/dev/sda3`; any
/// other name is returned unchanged.
pub fn canonical_device_name(device: &str) -> String {
    for prefix in ["/dev/xvd", "/dev/vd", "/dev/hd"] {
        if let Some(rest) = device.strip_prefix(prefix)
            && rest.starts_with(|c: char| c.is_ascii_lowercase())
        {
            return format!("/dev/sd{rest}");
        }
    }
    device.to_string()
}

/// Linux-style drive name for the `index`th attached disk: `sda` .. `sdz`, `sdaa` ..
pub fn drive_name(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index;
    loop {
        letters.push(char::from(b'a' + (n % 26) as u8));
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.iter().rev().collect()
}
