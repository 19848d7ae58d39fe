//! Raw disk image backend

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{
    DiskSpec, InspectionHandle, Inspector, PartitionTable, SUPPORTED_BLOCKSIZES, drive_name, gpt,
    mbr,
};

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";
const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Opens raw disk images read-only
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskInspector;

impl Inspector for DiskInspector {
    type Handle = DiskHandle;

    fn open(&self, disks: &[DiskSpec]) -> Result<DiskHandle> {
        DiskHandle::open(disks)
    }
}

struct AttachedDisk {
    device: String,
    path: PathBuf,
    file: File,
    blocksize: Option<u32>,
}

/// The disks of one guest, attached as `/dev/sda`, `/dev/sdb`, ...
///
/// Files are closed when the handle is dropped.
pub struct DiskHandle {
    disks: Vec<AttachedDisk>,
}

impl std::fmt::Debug for DiskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.disks.iter().map(|d| (&d.device, &d.path)))
            .finish()
    }
}

impl DiskHandle {
    pub fn open(specs: &[DiskSpec]) -> Result<Self> {
        if specs.is_empty() {
            bail!("no disks to inspect");
        }

        let mut disks = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let device = format!("/dev/sd{}", drive_name(index));
            tracing::trace!(%device, path = %spec.path.display(), "add_drive");
            disks.push(attach(device, spec)?);
        }

        Ok(Self { disks })
    }

    fn disk_mut(&mut self, device: &str) -> Result<&mut AttachedDisk> {
        self.disks
            .iter_mut()
            .find(|d| d.device == device)
            .with_context(|| format!("{device}: no such device"))
    }
}

fn attach(device: String, spec: &DiskSpec) -> Result<AttachedDisk> {
    if let Some(blocksize) = spec.blocksize
        && !SUPPORTED_BLOCKSIZES.contains(&blocksize)
    {
        bail!(
            "{}: invalid blocksize {blocksize} (expected 512 or 4096)",
            spec.path.display()
        );
    }

    match spec.format.as_deref() {
        None | Some("raw") => {}
        Some(other) => bail!(
            "{}: disk format '{other}' is not supported, only raw images can be inspected",
            spec.path.display()
        ),
    }

    let mut file = File::open(&spec.path)
        .with_context(|| format!("{}: cannot open disk image", spec.path.display()))?;

    if spec.format.is_none() && has_qcow2_magic(&mut file, &spec.path)? {
        bail!(
            "{}: qcow2 images are not supported, convert to raw first",
            spec.path.display()
        );
    }

    Ok(AttachedDisk {
        device,
        path: spec.path.clone(),
        file,
        blocksize: spec.blocksize,
    })
}

fn has_qcow2_magic(file: &mut File, path: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file
            .read(&mut magic[filled..])
            .with_context(|| format!("{}: cannot read disk image", path.display()))?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(&magic == QCOW2_MAGIC)
}

impl InspectionHandle for DiskHandle {
    fn list_devices(&self) -> Result<Vec<String>> {
        tracing::trace!("list_devices");
        Ok(self.disks.iter().map(|d| d.device.clone()).collect())
    }

    fn part_list(&mut self, device: &str) -> Result<PartitionTable> {
        tracing::trace!(%device, "part_list");
        let disk = self.disk_mut(device)?;
        let path = disk.path.display().to_string();

        let len = disk
            .file
            .metadata()
            .with_context(|| format!("{path}: cannot stat disk image"))?
            .len();
        if len < 512 {
            return Ok(PartitionTable::Unrecognised);
        }

        let boot = mbr::read_sector(&mut disk.file, 0, 512)
            .with_context(|| format!("{path}: cannot read boot sector"))?;
        let Some(entries) = mbr::parse_entries(&boot) else {
            return Ok(PartitionTable::Unrecognised);
        };

        let table = if mbr::is_protective(&entries) {
            let candidates = match disk.blocksize {
                Some(size) => vec![u64::from(size)],
                None => vec![DEFAULT_SECTOR_SIZE, 4096],
            };

            let mut found = None;
            for sector_size in candidates {
                if let Some(parts) = gpt::partitions(&mut disk.file, sector_size)
                    .with_context(|| format!("{path}: reading GPT"))?
                {
                    tracing::trace!(%device, sector_size, "found GPT");
                    found = Some(parts);
                    break;
                }
            }

            match found {
                Some(parts) => PartitionTable::Partitions(parts),
                None => PartitionTable::Unrecognised,
            }
        } else {
            let sector_size = disk.blocksize.map_or(DEFAULT_SECTOR_SIZE, u64::from);
            let parts = mbr::partitions(&mut disk.file, &entries, sector_size)
                .with_context(|| format!("{path}: reading MBR"))?;
            PartitionTable::Partitions(parts)
        };

        Ok(table)
    }
}
